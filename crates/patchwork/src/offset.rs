//! Relative (rel32) operands, as used by `call`/`jmp` and rip-relative addressing
//!
//! A rel32 operand is relative to the address right after its 4 bytes.

use crate::{
    memory::{self, MemError, Patcher, Protect},
    Address,
};

/// Size of a rel32 operand
pub const REL32_SIZE: usize = 4;

/// `destination - origin`, wrapped to 32 bits
pub fn compute_relative_offset(origin: Address, destination: Address) -> i32 {
    destination.wrapping_sub(origin) as i32
}

/// Resolve where the rel32 operand at `operand` points
///
/// # Safety
/// - `operand` must be valid for reads up to 4 bytes
pub unsafe fn follow_relative_offset(operand: Address) -> Address {
    let offset = unsafe { memory::read_value::<i32>(operand) };

    operand
        .wrapping_add(REL32_SIZE)
        .wrapping_add_signed(offset as isize)
}

/// Point the rel32 operand at `operand` to `destination`
///
/// Afterwards `follow_relative_offset(operand) == destination`, as long as the distance
/// fits in 32 bits.
///
/// # Safety
/// - `operand` must be valid for writes up to 4 bytes
/// - nothing may be executing the instruction owning the operand during the write
pub unsafe fn write_relative_offset<P: Protect>(
    patcher: &Patcher<P>,
    operand: Address,
    destination: Address,
) -> Result<(), MemError> {
    let offset = compute_relative_offset(operand.wrapping_add(REL32_SIZE), destination);
    unsafe { patcher.write_value(operand, offset) }
}
