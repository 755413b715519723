//! End-to-end coverage of the loader driven against real dictionary files
//! written to a scratch directory, one subdirectory per scenario.

use std::fs;
use std::path::{Path, PathBuf};

use radius_dict::dict::Value;
use radius_dict::error::DictErrorKind;
use radius_dict::types::AttributeType;
use radius_dict::{Loader, LoaderConfig};

/// A fresh scratch directory under the OS temp dir, scoped to one test by
/// name so parallel `cargo test` runs don't collide.
fn scratch_dir(test_name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "radius-dict-test-{test_name}-{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_dictionary(root: &Path, protocol: &str, contents: &str) {
    let dir = root.join(protocol);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("dictionary"), contents).unwrap();
}

fn write_include(root: &Path, protocol: &str, filename: &str, contents: &str) {
    let dir = root.join(protocol);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(filename), contents).unwrap();
}

#[test]
fn s1_simple_attribute_and_value() {
    let root = scratch_dir("s1");
    write_dictionary(
        &root,
        "radius",
        r#"
PROTOCOL radius 1
ATTRIBUTE User-Name 1 string
ATTRIBUTE NAS-Port 5 uint32
VALUE NAS-Port Console 0
VALUE NAS-Port Modem 1
"#,
    );

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let dict = loader.load_protocol(&mut protocols, "radius").unwrap();

    let user_name = dict.by_name("User-Name").unwrap();
    assert_eq!(dict.attr(user_name).number, 1);
    assert_eq!(dict.attr(user_name).attr_type, AttributeType::String);

    let nas_port = dict.by_name("NAS-Port").unwrap();
    assert_eq!(dict.attr(nas_port).number, 5);
    assert_eq!(dict.enum_by_alias(nas_port, "Console"), Some(&Value::Uint(0)));
    assert_eq!(dict.enum_by_alias(nas_port, "Modem"), Some(&Value::Uint(1)));
}

#[test]
fn s2_forward_declared_value_is_fixed_up() {
    let root = scratch_dir("s2");
    write_dictionary(
        &root,
        "radius",
        r#"
PROTOCOL radius 1
VALUE Service-Type Login-User 1
ATTRIBUTE Service-Type 6 uint32
"#,
    );

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let dict = loader.load_protocol(&mut protocols, "radius").unwrap();

    let service_type = dict.by_name("Service-Type").unwrap();
    assert_eq!(
        dict.enum_by_alias(service_type, "Login-User"),
        Some(&Value::Uint(1))
    );
}

#[test]
fn s3_tlv_nesting_with_relative_and_canonical_oid() {
    let root = scratch_dir("s3");
    write_dictionary(
        &root,
        "vendortest",
        r#"
PROTOCOL vendortest 2
ATTRIBUTE Vendor-TLV 100 tlv
BEGIN-TLV Vendor-TLV
ATTRIBUTE Sub-A 1 uint8
ATTRIBUTE Sub-B .2 uint8
END-TLV Vendor-TLV
"#,
    );

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let dict = loader.load_protocol(&mut protocols, "vendortest").unwrap();

    let tlv = dict.by_name("Vendor-TLV").unwrap();
    let sub_a = dict.by_name("Sub-A").unwrap();
    let sub_b = dict.by_name("Sub-B").unwrap();
    assert_eq!(dict.attr(sub_a).parent, Some(tlv));
    assert_eq!(dict.attr(sub_a).number, 1);
    assert_eq!(dict.attr(sub_b).parent, Some(tlv));
    assert_eq!(dict.attr(sub_b).number, 2);
}

#[test]
fn s4_struct_with_key_and_struct_subdeclarations() {
    let root = scratch_dir("s4");
    write_dictionary(
        &root,
        "structtest",
        r#"
PROTOCOL structtest 3
ATTRIBUTE Packet 10 struct
MEMBER Code uint8 key
MEMBER Length uint16
STRUCT Code Request 1
MEMBER ReqOpt uint8
STRUCT Code Reply 2
MEMBER RepOpt uint16
"#,
    );

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let dict = loader.load_protocol(&mut protocols, "structtest").unwrap();

    let code = dict.by_name("Code").unwrap();
    let request = dict.by_name("Request").unwrap();
    let reply = dict.by_name("Reply").unwrap();
    assert_eq!(dict.attr(request).number, 1);
    assert_eq!(dict.attr(reply).number, 2);
    assert_eq!(dict.enum_by_alias(code, "Request"), Some(&Value::Uint(1)));
    assert_eq!(dict.enum_by_alias(code, "Reply"), Some(&Value::Uint(2)));

    let req_opt = dict.by_name("ReqOpt").unwrap();
    let rep_opt = dict.by_name("RepOpt").unwrap();
    assert_eq!(dict.attr(req_opt).parent, Some(request));
    assert_eq!(dict.attr(req_opt).number, 1);
    assert_eq!(dict.attr(rep_opt).parent, Some(reply));
    assert_eq!(dict.attr(rep_opt).number, 1);
}

#[test]
fn s5_group_with_cross_protocol_ref_triggers_secondary_load() {
    let root = scratch_dir("s5");
    write_dictionary(
        &root,
        "Other",
        r#"
PROTOCOL Other 10
ATTRIBUTE Root-TLV 1 tlv
"#,
    );
    write_dictionary(
        &root,
        "maingrp",
        r#"
PROTOCOL maingrp 11
ATTRIBUTE Nested 20 group ref=Other.Root-TLV
"#,
    );

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let dict = loader.load_protocol(&mut protocols, "maingrp").unwrap();

    let nested = dict.by_name("Nested").unwrap();
    let (proto_name, target) = dict.attr(nested).group_target().unwrap();
    assert_eq!(proto_name, "Other");

    let other = protocols.get("Other").unwrap();
    assert_eq!(other.attr(target).name, "Root-TLV");
    assert_eq!(other.attr(target).attr_type, AttributeType::Tlv);
}

#[test]
fn s5_group_ref_to_non_tlv_target_fails() {
    let root = scratch_dir("s5-bad-target");
    write_dictionary(
        &root,
        "Other",
        r#"
PROTOCOL Other 10
ATTRIBUTE Not-A-Tlv 1 uint32
"#,
    );
    write_dictionary(
        &root,
        "maingrp",
        r#"
PROTOCOL maingrp 11
ATTRIBUTE Nested 20 group ref=Other.Not-A-Tlv
"#,
    );

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let err = loader.load_protocol(&mut protocols, "maingrp").unwrap_err();
    assert!(matches!(err.kind, DictErrorKind::Reference(_)));
    assert!(err.to_string().contains("not a tlv"));
}

#[test]
fn s6_mismatched_begin_end_names_the_inner_frame() {
    let root = scratch_dir("s6");
    write_dictionary(
        &root,
        "vendortest2",
        r#"
PROTOCOL vendortest2 12
VENDOR Acme 10
ATTRIBUTE Some-TLV 1 tlv
BEGIN-VENDOR Acme
BEGIN-TLV Some-TLV
END-VENDOR Acme
"#,
    );

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let err = loader.load_protocol(&mut protocols, "vendortest2").unwrap_err();
    assert!(matches!(err.kind, DictErrorKind::Context(_)));
    let text = err.to_string();
    assert!(text.contains("END-VENDOR Acme"));
    assert!(text.contains("BEGIN-TLV Some-TLV"));
}

#[test]
fn begin_tlv_under_a_vsa_is_rejected() {
    let root = scratch_dir("tlv-under-vsa");
    write_dictionary(
        &root,
        "vsatest",
        r#"
PROTOCOL vsatest 13
VENDOR Acme 10
BEGIN-VENDOR Acme
ATTRIBUTE Acme-TLV 1 tlv
END-VENDOR Acme
BEGIN-TLV Acme-TLV
"#,
    );

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let err = loader.load_protocol(&mut protocols, "vsatest").unwrap_err();
    assert!(matches!(err.kind, DictErrorKind::Context(_)));
    assert!(err.to_string().contains("is under a vsa"));
}

/// Builds a dictionary body chaining `depth` nested TLVs, each one the sole
/// child of its predecessor via a relative `.1` OID, with every `BEGIN-TLV`
/// properly closed. Each `BEGIN-TLV` pushes exactly one context frame, so
/// this is a direct way to dial in a specific context stack depth.
fn nested_tlv_chain(protocol: &str, number: u32, depth: u32) -> String {
    let mut body = format!("PROTOCOL {protocol} {number}\n");
    for i in 0..depth {
        let oid = if i == 0 { "1".to_string() } else { ".1".to_string() };
        body.push_str(&format!("ATTRIBUTE T{i} {oid} tlv\n"));
        body.push_str(&format!("BEGIN-TLV T{i}\n"));
    }
    for i in (0..depth).rev() {
        body.push_str(&format!("END-TLV T{i}\n"));
    }
    body
}

#[test]
fn context_depth_32_loads_33_fails() {
    let root = scratch_dir("depth");
    write_dictionary(&root, "deep", &nested_tlv_chain("deep", 13, 32));
    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    loader.load_protocol(&mut protocols, "deep").unwrap();

    write_dictionary(&root, "toodeep", &nested_tlv_chain("toodeep", 14, 33));
    let mut protocols2 = radius_dict::loader::ProtocolTable::new();
    let err = loader.load_protocol(&mut protocols2, "toodeep").unwrap_err();
    assert!(matches!(err.kind, DictErrorKind::Resource(_)));
}

#[test]
fn octets_length_boundaries() {
    let root = scratch_dir("octets-bounds");
    write_dictionary(
        &root,
        "octtest",
        r#"
PROTOCOL octtest 15
ATTRIBUTE Good-Min 1 octets[1]
ATTRIBUTE Good-Max 2 octets[253]
"#,
    );
    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let dict = loader.load_protocol(&mut protocols, "octtest").unwrap();
    let good_min = dict.by_name("Good-Min").unwrap();
    let good_max = dict.by_name("Good-Max").unwrap();
    assert_eq!(dict.attr(good_min).flags.length, 1);
    assert_eq!(dict.attr(good_max).flags.length, 253);

    write_dictionary(
        &root,
        "octbad0",
        "PROTOCOL octbad0 16\nATTRIBUTE Bad 1 octets[0]\n",
    );
    let mut protocols0 = radius_dict::loader::ProtocolTable::new();
    assert!(loader.load_protocol(&mut protocols0, "octbad0").is_err());

    write_dictionary(
        &root,
        "octbad254",
        "PROTOCOL octbad254 17\nATTRIBUTE Bad 1 octets[254]\n",
    );
    let mut protocols254 = radius_dict::loader::ProtocolTable::new();
    assert!(loader.load_protocol(&mut protocols254, "octbad254").is_err());
}

#[test]
fn soft_include_of_missing_file_succeeds_hard_include_fails() {
    let root = scratch_dir("include");
    write_dictionary(
        &root,
        "softinc",
        r#"
PROTOCOL softinc 18
$INCLUDE- does-not-exist.conf
ATTRIBUTE After-Soft-Include 1 uint8
"#,
    );
    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let dict = loader.load_protocol(&mut protocols, "softinc").unwrap();
    assert!(dict.by_name("After-Soft-Include").is_some());

    write_dictionary(
        &root,
        "hardinc",
        r#"
PROTOCOL hardinc 19
$INCLUDE does-not-exist.conf
ATTRIBUTE Unreached 1 uint8
"#,
    );
    let mut protocols2 = radius_dict::loader::ProtocolTable::new();
    let err = loader.load_protocol(&mut protocols2, "hardinc").unwrap_err();
    assert!(matches!(err.kind, DictErrorKind::Io(_)));
}

#[test]
fn include_preserves_and_restores_context() {
    let root = scratch_dir("include-ctx");
    write_include(
        &root,
        "incctx",
        "vendor.conf",
        r#"
ATTRIBUTE Included-Sub 2 uint8
"#,
    );
    write_dictionary(
        &root,
        "incctx",
        r#"
PROTOCOL incctx 20
ATTRIBUTE Container 50 tlv
BEGIN-TLV Container
ATTRIBUTE Direct-Sub 1 uint8
$INCLUDE vendor.conf
END-TLV Container
"#,
    );
    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let dict = loader.load_protocol(&mut protocols, "incctx").unwrap();
    let container = dict.by_name("Container").unwrap();
    let included = dict.by_name("Included-Sub").unwrap();
    assert_eq!(dict.attr(included).parent, Some(container));
    assert_eq!(dict.attr(included).number, 2);
}

#[test]
fn include_with_unterminated_block_is_rejected() {
    let root = scratch_dir("include-unterminated");
    write_include(
        &root,
        "badinc",
        "opens_tlv.conf",
        r#"
ATTRIBUTE Leftover 60 tlv
BEGIN-TLV Leftover
"#,
    );
    write_dictionary(
        &root,
        "badinc",
        r#"
PROTOCOL badinc 21
$INCLUDE opens_tlv.conf
"#,
    );
    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let err = loader.load_protocol(&mut protocols, "badinc").unwrap_err();
    assert!(matches!(err.kind, DictErrorKind::Context(_)));
}

#[test]
fn reloading_the_same_protocol_is_idempotent_by_identity() {
    let root = scratch_dir("reload");
    write_dictionary(
        &root,
        "radius",
        "PROTOCOL radius 1\nATTRIBUTE User-Name 1 string\n",
    );
    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let first = loader.load_protocol(&mut protocols, "radius").unwrap();
    let second = loader.load_protocol(&mut protocols, "radius").unwrap();
    assert!(std::rc::Rc::ptr_eq(&first, &second));
}

#[cfg(unix)]
#[test]
fn world_writable_dictionary_file_is_rejected() {
    use std::os::unix::fs::PermissionsExt;

    let root = scratch_dir("world-writable");
    write_dictionary(&root, "unsafe", "PROTOCOL unsafeproto 22\n");
    let path = root.join("unsafe").join("dictionary");
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o666);
    fs::set_permissions(&path, perms).unwrap();

    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let err = loader.load_protocol(&mut protocols, "unsafe").unwrap_err();
    assert!(matches!(err.kind, DictErrorKind::Security(_)));
}

#[test]
fn second_protocol_directive_outside_begin_protocol_is_rejected() {
    // A flat, directly-loaded protocol file (the common case: no enclosing
    // BEGIN-PROTOCOL/END-PROTOCOL) may declare PROTOCOL exactly once; a
    // second PROTOCOL line in the same file is a context error rather than
    // silently opening (or cross-checking against) a second dictionary.
    let root = scratch_dir("protocol-mismatch");
    write_dictionary(
        &root,
        "confused",
        r#"
PROTOCOL confused 23
ATTRIBUTE First 1 uint8
PROTOCOL confused 24
"#,
    );
    let loader = Loader::new(&root, LoaderConfig::default());
    let mut protocols = radius_dict::loader::ProtocolTable::new();
    let err = loader.load_protocol(&mut protocols, "confused").unwrap_err();
    assert!(matches!(err.kind, DictErrorKind::Context(_)));
}
