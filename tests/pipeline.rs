// Copyright 2025 Cornell University
// released under MIT License

use std::io::Write;

use emg::backends::{translate_collection, Backend, CModel, FunctionKind, TranslationConfig};
use emg::description::{load_file, Loaded};
use emg::errors::TranslationError;
use emg::peers::Peer;

const USB: &str = include_str!("descriptions/usb.json");

fn load() -> Loaded {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(USB.as_bytes()).unwrap();
    let mut loaded = load_file(file.path()).unwrap();
    loaded.collection.establish_peers();
    loaded
}

fn translate(loaded: &Loaded, config: &TranslationConfig) -> CModel {
    translate_collection(&loaded.collection, &loaded.interfaces, config).unwrap()
}

fn trimmed(lines: &[String]) -> Vec<&str> {
    lines.iter().map(|l| l.trim()).collect()
}

#[test]
fn signals_are_linked_both_ways() {
    let loaded = load();
    let collection = &loaded.collection;
    let main = collection.by_name("main").unwrap();
    let usb = collection.by_name("usb_driver").unwrap();
    let peers = collection.peers().unwrap();

    let register = collection[main].action_id("register").unwrap();
    let receive = collection[usb].action_id("register").unwrap();
    assert_eq!(
        peers.peers(main, register),
        &[Peer {
            process: usb,
            action: receive
        }]
    );
    assert_eq!(
        peers.peers(usb, receive),
        &[Peer {
            process: main,
            action: register
        }]
    );
    // callbacks are invoked, not delivered
    let probe = collection[usb].action_id("probe").unwrap();
    assert!(peers.peers(usb, probe).is_empty());
}

#[test]
fn label_backend_generates_the_driver_model() {
    let loaded = load();
    let model = translate(&loaded, &TranslationConfig::default());
    let names: Vec<&str> = model.functions.iter().map(|f| f.function_name.as_str()).collect();
    assert_eq!(names, vec!["ldv_main_0", "ldv_usb_driver_1", "ldv_main"]);

    let main = trimmed(&model.functions[0].body);
    assert!(main.contains(&"ldv_0_ready = 0;"));
    assert!(main.contains(&"ldv_0_ready = 1;"));
    assert!(main.contains(&"ldv_assume(ldv_0_ready);"));
    assert!(main.contains(&"ldv_assume(ldv_1_state == 1 || ldv_1_state == -1);"));
    assert!(main.contains(&"ldv_1_driver = ldv_0_driver;"));
    assert!(main.contains(&"ldv_1_state = -1;"));

    let usb = trimmed(&model.functions[1].body);
    assert!(usb.contains(&"ldv_1_probe = ldv_1_driver->probe;"));
    assert!(usb.contains(&"if (ldv_1_probe) {"));
    assert!(usb.contains(&"ldv_1_ret = ldv_1_probe(ldv_1_intf);"));
    assert!(usb.contains(&"ldv_assume(ldv_1_ret == 0);"));
    assert!(usb.contains(&"ldv_1_intf = ldv_xmalloc_unknown_size(0);"));
    // function pointers are never allocated
    assert!(!usb.iter().any(|l| l.starts_with("ldv_1_probe = ldv_xmalloc")));
    assert_eq!(usb.iter().filter(|l| **l == "ldv_1_sub_main:").count(), 1);
    assert_eq!(usb.iter().filter(|l| **l == "goto ldv_1_sub_main;").count(), 2);
    // the dispatch of `deregister` parks the main process' receive
    assert!(usb.contains(&"ldv_assume(ldv_0_state == 1);"));

    let declarations = &model.files_to_declarations["environment_model.c"];
    for expected in [
        "int ldv_1_state = 0;",
        "int (*ldv_1_probe)(struct usb_interface *);",
        "struct usb_interface *ldv_1_intf;",
        "struct usb_driver *ldv_0_driver;",
    ] {
        assert!(
            declarations.iter().any(|d| d == expected),
            "missing `{expected}` in {declarations:?}"
        );
    }
}

#[test]
fn state_backend_polls_step_functions() {
    let loaded = load();
    let config = TranslationConfig {
        backend: Backend::State,
        ..Default::default()
    };
    let model = translate(&loaded, &config);
    let usb = trimmed(&model.functions[1].body);
    assert_eq!(usb[1], "switch (ldv_statevar_1) {");
    assert!(usb.contains(&"default:"));
    assert!(usb.contains(&"ldv_1_ret = ldv_1_probe(ldv_1_intf);"));

    let entry = model.functions.last().unwrap();
    assert_eq!(entry.signature, "void ldv_main(void)");
    let calls = trimmed(&entry.body);
    assert!(calls.contains(&"ldv_main_0();"));
    assert!(calls.contains(&"ldv_usb_driver_1();"));
}

#[test]
fn model_serializes_for_the_cli() {
    let loaded = load();
    let model = translate(&loaded, &TranslationConfig::default());
    let json = serde_json::to_string(&model).unwrap();
    let back: CModel = serde_json::from_str(&json).unwrap();
    assert_eq!(back, model);
}

#[test]
fn unsupported_requests_are_refused() {
    let loaded = load();
    let config = TranslationConfig {
        nested_automata: true,
        function_kind: FunctionKind::Thread,
        ..Default::default()
    };
    let err = translate_collection(&loaded.collection, &loaded.interfaces, &config).unwrap_err();
    assert!(matches!(err, TranslationError::BackendMisuse { .. }));

    let mut unresolved = load();
    unresolved.collection.add_model(emg::ir::Process::from_dsl("late", "test", "<a>").unwrap()).unwrap();
    assert_eq!(
        translate_collection(&unresolved.collection, &unresolved.interfaces, &TranslationConfig::default())
            .unwrap_err(),
        TranslationError::PeersNotEstablished
    );
}
