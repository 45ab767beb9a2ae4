use libc::c_int;
use proptest::prelude::*;
use virtlink_common::params::RawTypedParam;
use virtlink_host::{native_call, params, NativeCall, ParamMap, ParamValue, VirtlinkError};
use virtlink_testing::{
    record_error, stub_vm_param_count, stub_vm_param_fill, stub_vm_param_set, StubConn,
    StubParamValue, StubVm,
};

pub mod common; // pub to disable dead_code warning
use crate::common::new_machine;

fn fetch(vm: &StubVm, conn: &StubConn, flags: Option<u32>) -> virtlink_host::Result<ParamMap> {
    params::retrieve(
        vm,
        conn,
        flags,
        native_call!(stub_vm_param_count, stub_vm_param_count),
        native_call!(stub_vm_param_fill, stub_vm_param_fill),
    )
}

fn apply(
    vm: &StubVm,
    conn: &StubConn,
    input: &ParamMap,
    flags: Option<u32>,
) -> virtlink_host::Result<()> {
    params::assign(
        vm,
        conn,
        input,
        flags,
        native_call!(stub_vm_param_count, stub_vm_param_count),
        native_call!(stub_vm_param_fill, stub_vm_param_fill),
        native_call!(stub_vm_param_set, stub_vm_param_set),
    )
}

/// A declaration of the same kind as `value`, holding that kind's zero.
fn zero_like(value: &ParamValue) -> StubParamValue {
    match value {
        ParamValue::Int(_) => StubParamValue::Int(0),
        ParamValue::UInt(_) => StubParamValue::UInt(0),
        ParamValue::Long(_) => StubParamValue::Long(0),
        ParamValue::ULong(_) => StubParamValue::ULong(0),
        ParamValue::Double(_) => StubParamValue::Double(0.0),
        ParamValue::Bool(_) => StubParamValue::Bool(false),
        ParamValue::String(_) => StubParamValue::String(String::new()),
    }
}

#[test]
fn retrieves_every_declared_kind_in_order() {
    let machine = new_machine("metrics");
    let vm = machine.vm();
    vm.declare_param("cpu.count", StubParamValue::Int(4));
    vm.declare_param("cpu.quota", StubParamValue::UInt(100_000));
    vm.declare_param("balloon.current", StubParamValue::Long(-1));
    vm.declare_param("balloon.maximum", StubParamValue::ULong(1 << 33));
    vm.declare_param("cpu.weight", StubParamValue::Double(2.5));
    vm.declare_param("acpi", StubParamValue::Bool(true));
    vm.declare_param("machine.type", StubParamValue::String("q35".to_string()));

    let conn = StubConn::new();
    let map = fetch(vm, &conn, None).unwrap();

    let entries: Vec<(&str, &ParamValue)> = map.iter().map(|(k, v)| (k.as_str(), v)).collect();
    assert_eq!(
        entries,
        vec![
            ("cpu.count", &ParamValue::Int(4)),
            ("cpu.quota", &ParamValue::UInt(100_000)),
            ("balloon.current", &ParamValue::Long(-1)),
            ("balloon.maximum", &ParamValue::ULong(1 << 33)),
            ("cpu.weight", &ParamValue::Double(2.5)),
            ("acpi", &ParamValue::Bool(true)),
            ("machine.type", &ParamValue::String("q35".to_string())),
        ]
    );
}

#[test]
fn zero_declared_parameters_yield_an_empty_map() {
    let machine = new_machine("bare");
    let conn = StubConn::new();
    let map = params::retrieve(
        machine.vm(),
        &conn,
        None,
        native_call!(stub_vm_param_count, stub_vm_param_count),
        NativeCall::new(
            "stub_vm_param_fill",
            |_: &StubVm, _: u32, _: &mut [RawTypedParam], _: &mut c_int| -> Option<&'static str> {
                panic!("fill must not run for an empty parameter set")
            },
        ),
    )
    .unwrap();
    assert!(map.is_empty());
}

#[test]
fn unsupported_count_raises_no_support_regardless_of_flags() {
    let machine = new_machine("legacy");
    let conn = StubConn::new();
    for flags in [None, Some(7)] {
        let err = params::retrieve(
            machine.vm(),
            &conn,
            flags,
            NativeCall::new("stub_vm_param_count", |_: &StubVm, _: u32| -1),
            native_call!(stub_vm_param_fill, stub_vm_param_fill),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            VirtlinkError::NoSupport(f) if f.function == "stub_vm_param_count"
        ));
    }
}

#[test]
fn fill_failure_names_the_failing_entry_point() {
    let machine = new_machine("flaky");
    let vm = machine.vm();
    vm.declare_param("cpu.count", StubParamValue::Int(2));
    let conn = StubConn::new();

    record_error(1, 0, "internal error");
    let err = params::retrieve(
        vm,
        &conn,
        None,
        native_call!(stub_vm_param_count, stub_vm_param_count),
        NativeCall::new(
            "stub_vm_param_fill",
            |_: &StubVm, _: u32, _: &mut [RawTypedParam], _: &mut c_int| {
                Some("stubVmGetParameters")
            },
        ),
    )
    .unwrap_err();
    assert!(matches!(err, VirtlinkError::Call(_)));
    assert_eq!(
        err.to_string(),
        "call to stubVmGetParameters failed: internal error"
    );
}

#[test]
fn retrieval_flags_default_to_zero() {
    let machine = new_machine("plain");
    let conn = StubConn::new();
    let map = params::retrieve(
        machine.vm(),
        &conn,
        None,
        NativeCall::new("stub_vm_param_count", |_: &StubVm, flags: u32| {
            assert_eq!(flags, 0);
            0
        }),
        native_call!(stub_vm_param_fill, stub_vm_param_fill),
    )
    .unwrap();
    assert!(map.is_empty());
}

#[test]
fn assignment_then_retrieval_roundtrips() {
    let machine = new_machine("cfg");
    let vm = machine.vm();
    vm.declare_param("a", StubParamValue::Int(0));
    vm.declare_param("b", StubParamValue::String(String::new()));
    let conn = StubConn::new();

    let mut input = ParamMap::new();
    input.insert("a".to_string(), ParamValue::Int(7));
    input.insert("b".to_string(), ParamValue::String("x".to_string()));
    apply(vm, &conn, &input, None).unwrap();

    let fetched = fetch(vm, &conn, None).unwrap();
    assert_eq!(fetched, input);
}

#[test]
fn assignment_leaves_unmentioned_parameters_alone() {
    let machine = new_machine("partial");
    let vm = machine.vm();
    vm.declare_param("cpu.count", StubParamValue::Int(3));
    vm.declare_param("machine.type", StubParamValue::String("pc".to_string()));
    let conn = StubConn::new();

    let mut input = ParamMap::new();
    input.insert(
        "machine.type".to_string(),
        ParamValue::String("q35".to_string()),
    );
    apply(vm, &conn, &input, None).unwrap();

    assert_eq!(vm.param("cpu.count"), Some(StubParamValue::Int(3)));
    assert_eq!(
        vm.param("machine.type"),
        Some(StubParamValue::String("q35".to_string()))
    );
}

#[test]
fn unknown_parameter_is_rejected_before_any_write() {
    let machine = new_machine("strict");
    let vm = machine.vm();
    vm.declare_param("cpu.count", StubParamValue::Int(3));
    let conn = StubConn::new();

    let mut input = ParamMap::new();
    input.insert("cpu.count".to_string(), ParamValue::Int(8));
    input.insert("memory.limit".to_string(), ParamValue::ULong(1 << 30));
    let err = apply(vm, &conn, &input, None).unwrap_err();

    assert!(matches!(err, VirtlinkError::Definition(_)));
    assert!(err.to_string().contains("unknown parameter memory.limit"));
    // nothing reached the native side
    assert_eq!(vm.param("cpu.count"), Some(StubParamValue::Int(3)));
}

#[test]
fn mismatched_kind_is_rejected_before_any_write() {
    let machine = new_machine("strict");
    let vm = machine.vm();
    vm.declare_param("cpu.count", StubParamValue::Int(3));
    let conn = StubConn::new();

    let mut input = ParamMap::new();
    input.insert("cpu.count".to_string(), ParamValue::ULong(8));
    let err = apply(vm, &conn, &input, None).unwrap_err();

    assert!(matches!(err, VirtlinkError::Definition(_)));
    assert!(err
        .to_string()
        .contains("parameter cpu.count expects Int, got ULong"));
    assert_eq!(vm.param("cpu.count"), Some(StubParamValue::Int(3)));
}

#[test]
fn embedded_nul_in_a_string_value_is_rejected() {
    let machine = new_machine("strict");
    let vm = machine.vm();
    vm.declare_param("machine.type", StubParamValue::String("pc".to_string()));
    let conn = StubConn::new();

    let mut input = ParamMap::new();
    input.insert(
        "machine.type".to_string(),
        ParamValue::String("q\035".to_string()),
    );
    let err = apply(vm, &conn, &input, None).unwrap_err();

    assert!(matches!(err, VirtlinkError::Definition(_)));
    assert!(err.to_string().contains("embedded NUL"));
}

#[test]
fn empty_input_makes_no_native_call() {
    let machine = new_machine("idle");
    let conn = StubConn::new();
    params::assign(
        machine.vm(),
        &conn,
        &ParamMap::new(),
        None,
        NativeCall::new("stub_vm_param_count", |_: &StubVm, _: u32| -> c_int {
            panic!("no native call expected for an empty assignment")
        }),
        native_call!(stub_vm_param_fill, stub_vm_param_fill),
        native_call!(stub_vm_param_set, stub_vm_param_set),
    )
    .unwrap();
}

#[test]
fn declared_parameter_fetch_failure_is_a_retrieve_error() {
    let machine = new_machine("flaky");
    let vm = machine.vm();
    vm.declare_param("cpu.count", StubParamValue::Int(3));
    let conn = StubConn::new();

    let mut input = ParamMap::new();
    input.insert("cpu.count".to_string(), ParamValue::Int(8));
    record_error(1, 0, "internal error");
    let err = params::assign(
        vm,
        &conn,
        &input,
        None,
        native_call!(stub_vm_param_count, stub_vm_param_count),
        NativeCall::new(
            "stub_vm_param_fill",
            |_: &StubVm, _: u32, _: &mut [RawTypedParam], _: &mut c_int| {
                Some("stubVmGetParameters")
            },
        ),
        native_call!(stub_vm_param_set, stub_vm_param_set),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        VirtlinkError::Retrieve(f) if f.function == "stubVmGetParameters"
    ));
}

#[test]
fn set_failure_is_a_definition_error() {
    let machine = new_machine("flaky");
    let vm = machine.vm();
    vm.declare_param("cpu.count", StubParamValue::Int(3));
    let conn = StubConn::new();

    let mut input = ParamMap::new();
    input.insert("cpu.count".to_string(), ParamValue::Int(8));
    record_error(2, 0, "rejected by the hypervisor");
    let err = params::assign(
        vm,
        &conn,
        &input,
        None,
        native_call!(stub_vm_param_count, stub_vm_param_count),
        native_call!(stub_vm_param_fill, stub_vm_param_fill),
        NativeCall::new(
            "stub_vm_param_set",
            |_: &StubVm, _: u32, _: &[RawTypedParam], _: c_int| Some("stubVmSetParameters"),
        ),
    )
    .unwrap_err();
    assert!(matches!(
        &err,
        VirtlinkError::Definition(f) if f.function == "stubVmSetParameters"
    ));
    assert_eq!(
        err.to_string(),
        "call to stubVmSetParameters failed: rejected by the hypervisor"
    );
}

#[test]
fn assignment_flags_default_to_zero() {
    let machine = new_machine("plain");
    let vm = machine.vm();
    vm.declare_param("cpu.count", StubParamValue::Int(3));
    let conn = StubConn::new();

    let mut input = ParamMap::new();
    input.insert("cpu.count".to_string(), ParamValue::Int(8));
    params::assign(
        vm,
        &conn,
        &input,
        None,
        NativeCall::new("stub_vm_param_count", |vm: &StubVm, flags: u32| {
            assert_eq!(flags, 0);
            stub_vm_param_count(vm, flags)
        }),
        native_call!(stub_vm_param_fill, stub_vm_param_fill),
        native_call!(stub_vm_param_set, stub_vm_param_set),
    )
    .unwrap();
    assert_eq!(vm.param("cpu.count"), Some(StubParamValue::Int(8)));
}

fn param_value() -> impl Strategy<Value = ParamValue> {
    prop_oneof![
        any::<i32>().prop_map(ParamValue::Int),
        any::<u32>().prop_map(ParamValue::UInt),
        any::<i64>().prop_map(ParamValue::Long),
        any::<u64>().prop_map(ParamValue::ULong),
        (-1.0e9..1.0e9f64).prop_map(ParamValue::Double),
        any::<bool>().prop_map(ParamValue::Bool),
        "[a-z0-9 ./-]{0,24}".prop_map(ParamValue::String),
    ]
}

proptest! {
    #[test]
    fn assignment_roundtrips_over_generated_maps(
        values in prop::collection::vec(param_value(), 1..6)
    ) {
        let machine = new_machine("generated");
        let vm = machine.vm();
        let conn = StubConn::new();

        let mut input = ParamMap::new();
        for (i, value) in values.iter().enumerate() {
            let name = format!("p{i}");
            vm.declare_param(&name, zero_like(value));
            input.insert(name, value.clone());
        }

        apply(vm, &conn, &input, None).unwrap();
        let fetched = fetch(vm, &conn, None).unwrap();
        prop_assert_eq!(fetched, input);
    }
}
