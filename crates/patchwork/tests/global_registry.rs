use patchwork::{registry, Region, SignatureError, SignatureSpec};

// one test per binary: the registry is process-wide
#[test]
fn test_failed_init_leaves_nothing_behind_and_can_be_retried() {
    let image: &'static mut [u8] = vec![
        0x55, 0x8B, 0xEC, 0xA1, 0x78, 0x56, 0x34, 0x12, 0x5D, 0xC3, //
    ]
    .leak();
    let region = Region::new(image.as_mut_ptr() as usize, image.len()).unwrap();

    let prologue = SignatureSpec::new("prologue", "55 8B EC");
    let global_ptr = SignatureSpec::new("global_ptr", "A1 ?? ?? ?? ?? 5D").offset(1);
    let absent = SignatureSpec::new("absent", "DE AD BE EF");

    let err = unsafe { registry::init(region, &[prologue, absent, global_ptr]) }.unwrap_err();
    assert!(matches!(
        err,
        SignatureError::PatternNotFound { ref name, .. } if name == "absent"
    ));

    assert!(registry::global().is_none());
    assert!(registry::get_signature("prologue").is_none());
    assert_eq!(registry::address_for_signature("prologue"), None);

    let registry = unsafe { registry::init(region, &[prologue, global_ptr]) }.unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry::address_for_signature("global_ptr"),
        Some(region.base() + 4)
    );
    assert_eq!(
        registry::get_signature("global_ptr").map(|s| s.original_bytes().to_vec()),
        Some(vec![0x78, 0x56, 0x34, 0x12, 0x5D])
    );
}
