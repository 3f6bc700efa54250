use serde_json::json;

use crate::config::ModuleManagerConfig;
use crate::module_system::{ModuleCatalog, ModuleError, ModuleKind, ModuleState, SpecSource};
use crate::tests::integration::common::*;

const LIGHTS_SPEC: &str = "\
meta:
  name: Lights
  description: Light switches
pip-requirements:
  - requests (>=2.0)
items:
  - id: lamp
    type: switch
    cfg: {pin: 4}
  - id: ceiling
    type: switch
";

#[tokio::test]
async fn test_folder_module_with_satisfied_dependencies_loads_without_install() {
    let h = Harness::with_packages(
        |j| recording_catalog(j, &["lights"]),
        ScriptedPackageManager::new(&[("requests", "2.31.0")]),
        ModuleManagerConfig::default(),
    );
    let mut probe = h.probe();
    let path = write_folder_module(h.root(), "lights", Some(LIGHTS_SPEC));

    let summary = h
        .manager
        .load_folder_module(&path, "lights")
        .await
        .expect("module should load");

    assert_eq!(summary.name, "lights");
    assert_eq!(summary.kind, ModuleKind::Folder);
    assert_eq!(summary.state, ModuleState::Running);
    assert_eq!(summary.meta.name.as_deref(), Some("Lights"));
    assert_eq!(summary.items, vec!["lamp".to_string(), "ceiling".to_string()]);
    assert!(h.packages.installs().is_empty(), "no install for satisfied requirements");
    assert!(h.manager.is_loaded("lights"));

    let event = probe.next_of("module_loaded").await;
    assert_eq!(event.get("module").unwrap()["name"], json!("lights"));
    assert_eq!(event.kwargs().len(), 1);

    assert_eq!(
        h.journal.entries(),
        vec!["items.add:lights", "init:lights", "start:lights"]
    );
    let lamp = h.items.inner().get("lamp").await.expect("item registered");
    assert_eq!(lamp.cfg(), &json!({"pin": 4}));
}

#[tokio::test]
async fn test_folder_module_missing_spec_reports_failure_with_name() {
    let h = Harness::new(|j| recording_catalog(j, &["broken"]));
    let mut probe = h.probe();
    let path = write_folder_module(h.root(), "broken", None);

    let failure = h
        .manager
        .load_folder_module(&path, "broken")
        .await
        .expect_err("a folder module without spec cannot load");

    assert_eq!(failure.name, "broken");
    assert_eq!(failure.stage, ModuleState::Discovered);
    match &failure.error {
        ModuleError::StructureInvalid { missing, .. } => assert_eq!(missing, "module.yaml"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!h.manager.is_loaded("broken"));

    let event = probe.next_of("module_not_loaded").await;
    assert_eq!(event.get("name"), Some(&json!("broken")));
    let exception = event.get("exception").and_then(|v| v.as_str()).unwrap();
    assert!(exception.contains("module.yaml"));
    assert!(h.journal.entries().is_empty(), "nothing was instantiated");
}

#[tokio::test]
async fn test_folder_module_missing_entry_point_is_structure_error() {
    let h = Harness::new(|j| recording_catalog(j, &["lights"]));
    let dir = h.root().join("lights");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("module.yaml"), LIGHTS_SPEC).unwrap();

    let failure = h.manager.load_folder_module(&dir, "lights").await.unwrap_err();
    assert!(matches!(
        failure.error,
        ModuleError::StructureInvalid { ref missing, .. } if missing == "module.so"
    ));
}

#[tokio::test]
async fn test_unsatisfied_requirements_are_installed_in_one_call() {
    let h = Harness::with_packages(
        |j| recording_catalog(j, &["ir_adapter"]),
        ScriptedPackageManager::new(&[("requests", "1.9"), ("PyYAML", "6.0.1")]),
        ModuleManagerConfig::default(),
    );
    let spec = "\
pip-requirements:
  - requests (>=2.0)
  - pyserial (>=3.4)
  - pyserial>=3.4
  - pyyaml
";
    let path = write_folder_module(h.root(), "ir_adapter", Some(spec));

    h.manager
        .load_folder_module(&path, "ir_adapter")
        .await
        .expect("install succeeds, module loads");

    assert_eq!(
        h.packages.installs(),
        vec![vec!["requests>=2.0".to_string(), "pyserial>=3.4".to_string()]]
    );
    // Initial snapshot plus the re-list after the install
    assert_eq!(h.packages.list_calls(), 2);
}

#[tokio::test]
async fn test_failed_install_fails_the_load() {
    let h = Harness::new(|j| recording_catalog(j, &["rf"]));
    h.packages.set_exit_code(1);
    let mut probe = h.probe();
    let path = write_folder_module(h.root(), "rf", Some("pip-requirements: [paho-mqtt]\n"));

    let failure = h.manager.load_folder_module(&path, "rf").await.unwrap_err();
    match &failure.error {
        ModuleError::DependencyInstallFailed { name, requirements, status } => {
            assert_eq!(name, "rf");
            assert_eq!(requirements, &vec!["paho-mqtt".to_string()]);
            assert_eq!(*status, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(failure.stage, ModuleState::DependenciesResolving);
    assert!(!h.manager.is_loaded("rf"));
    assert!(h.journal.entries().is_empty());

    let event = probe.next_of("module_not_loaded").await;
    assert_eq!(event.get("name"), Some(&json!("rf")));
}

#[tokio::test]
async fn test_package_listing_failure_treats_nothing_as_installed() {
    let h = Harness::with_packages(
        |j| recording_catalog(j, &["rf"]),
        ScriptedPackageManager::failing_listing(),
        ModuleManagerConfig::default(),
    );
    let path = write_folder_module(h.root(), "rf", Some("pip-requirements: [paho-mqtt]\n"));

    h.manager.load_folder_module(&path, "rf").await.unwrap();
    assert_eq!(h.packages.installs(), vec![vec!["paho-mqtt".to_string()]]);
}

#[tokio::test]
async fn test_invalid_requirement_fails_the_load() {
    let h = Harness::new(|j| recording_catalog(j, &["rf"]));
    let path = write_folder_module(h.root(), "rf", Some("pip-requirements: ['paho-mqtt (^1.0)']\n"));

    let failure = h.manager.load_folder_module(&path, "rf").await.unwrap_err();
    assert!(matches!(failure.error, ModuleError::RequirementInvalid { .. }));
    assert!(h.packages.installs().is_empty());
}

#[tokio::test]
async fn test_file_module_with_inline_yaml_spec() {
    let h = Harness::new(|journal| {
        let journal = journal.clone();
        let mut catalog = crate::module_system::ModuleCatalog::new();
        catalog.register("szenes", move || {
            Box::new(TestCode::recording(journal.clone()).with_spec(SpecSource::Text(
                "meta:\n  name: Szenes\nitems:\n  - {id: movie_night, type: szene}\n".to_string(),
            ))) as Box<dyn crate::module_system::ModuleCode>
        });
        catalog
    });
    let path = write_file_module(h.root(), "szenes");

    let summary = h.manager.load_file_module(&path, "szenes").await.unwrap();
    assert_eq!(summary.kind, ModuleKind::File);
    assert_eq!(summary.meta.name.as_deref(), Some("Szenes"));
    assert_eq!(summary.items, vec!["movie_night".to_string()]);
}

#[tokio::test]
async fn test_file_module_without_code_fails() {
    let h = Harness::new(|_| crate::module_system::ModuleCatalog::new());
    let mut probe = h.probe();
    let path = write_file_module(h.root(), "unknown");

    let failure = h.manager.load_file_module(&path, "unknown").await.unwrap_err();
    assert!(matches!(failure.error, ModuleError::CodeNotFound { .. }));

    let event = probe.next_of("module_not_loaded").await;
    assert_eq!(event.get("name"), Some(&json!("unknown")), "file modules report their name too");
}

#[tokio::test]
async fn test_missing_file_module_is_structure_error() {
    let h = Harness::new(|j| recording_catalog(j, &["ghost"]));
    let failure = h
        .manager
        .load_file_module(&h.root().join("ghost.so"), "ghost")
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ModuleError::StructureInvalid { .. }));
}

#[tokio::test]
async fn test_module_without_behavior_uses_generic_contract() {
    let h = Harness::new(|_| {
        let mut catalog = crate::module_system::ModuleCatalog::new();
        catalog.register("plain", || Box::new(TestCode::plain()) as Box<dyn crate::module_system::ModuleCode>);
        catalog
    });
    let path = write_file_module(h.root(), "plain");

    h.manager.load_file_module(&path, "plain").await.unwrap();
    h.manager.unload("plain").await.unwrap();
    assert!(!h.manager.is_loaded("plain"));
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let h = Harness::new(|j| recording_catalog(j, &["lights"]));
    let mut probe = h.probe();
    let folder = write_folder_module(h.root(), "lights", Some(LIGHTS_SPEC));
    h.packages.add_installed("requests", "2.0");
    let file = write_file_module(h.root(), "lights");

    h.manager.load_folder_module(&folder, "lights").await.unwrap();
    probe.next_of("module_loaded").await;

    let failure = h.manager.load_file_module(&file, "lights").await.unwrap_err();
    assert!(matches!(failure.error, ModuleError::AlreadyLoaded { ref name } if name == "lights"));
    probe.next_of("module_not_loaded").await;

    // The first module is untouched
    let summary = h.manager.descriptor("lights").unwrap();
    assert_eq!(summary.kind, ModuleKind::Folder);
    assert_eq!(h.journal.matching("init:"), vec!["init:lights"]);
    assert_eq!(h.manager.module_names(), vec!["lights".to_string()]);
}

#[tokio::test]
async fn test_init_failure_rolls_back() {
    let h = Harness::new(|journal| {
        let journal = journal.clone();
        let mut catalog = crate::module_system::ModuleCatalog::new();
        catalog.register("flaky", move || {
            Box::new(TestCode::failing(journal.clone(), FailAt::Init)) as Box<dyn crate::module_system::ModuleCode>
        });
        catalog
    });
    let path = write_folder_module(h.root(), "flaky", Some("items:\n  - {id: flaky_item, type: sensor}\n"));

    let failure = h.manager.load_folder_module(&path, "flaky").await.unwrap_err();
    assert!(matches!(failure.error, ModuleError::LifecycleFailed { .. }));
    assert!(!h.manager.is_loaded("flaky"));
    assert!(h.items.inner().get("flaky_item").await.is_none(), "items are taken back");
    assert_eq!(h.events.handler_count("flaky.ping"), 0, "subscriptions are revoked");
}

#[tokio::test]
async fn test_start_failure_stops_and_rolls_back() {
    let h = Harness::new(|journal| {
        let journal = journal.clone();
        let mut catalog = crate::module_system::ModuleCatalog::new();
        catalog.register("flaky", move || {
            Box::new(TestCode::failing(journal.clone(), FailAt::Start)) as Box<dyn crate::module_system::ModuleCode>
        });
        catalog
    });
    let path = write_file_module(h.root(), "flaky");

    let failure = h.manager.load_file_module(&path, "flaky").await.unwrap_err();
    assert_eq!(failure.stage, ModuleState::Initialized);
    assert_eq!(h.journal.entries(), vec!["items.add:flaky", "init:flaky", "start:flaky", "stop:flaky"]);
    assert!(!h.manager.is_loaded("flaky"));
}

#[tokio::test]
async fn test_unload_removes_items_before_stop() {
    let h = Harness::with_packages(
        |j| recording_catalog(j, &["lights"]),
        ScriptedPackageManager::new(&[("requests", "2.31.0")]),
        ModuleManagerConfig::default(),
    );
    let path = write_folder_module(h.root(), "lights", Some(LIGHTS_SPEC));
    h.manager.load_folder_module(&path, "lights").await.unwrap();
    assert_eq!(h.events.handler_count("lights.ping"), 1);

    h.manager.unload("lights").await.expect("unload succeeds");

    let stop = h.journal.position("stop:lights").expect("stop ran");
    for item in ["lamp", "ceiling"] {
        let removed = h
            .journal
            .position(&format!("items.remove:{}", item))
            .expect("item removed");
        assert!(removed < stop, "{item} must be removed before stop");
    }
    assert!(!h.manager.is_loaded("lights"));
    assert!(h.items.inner().is_empty().await);
    assert_eq!(h.events.handler_count("lights.ping"), 0, "leftover subscriptions are revoked");
}

#[tokio::test]
async fn test_unload_unknown_module_is_not_found() {
    let h = Harness::new(|_| crate::module_system::ModuleCatalog::new());
    let err = h.manager.unload("nothing").await.unwrap_err();
    assert!(matches!(err, ModuleError::NotFound { ref name } if name == "nothing"));
}

#[tokio::test]
async fn test_item_removal_failure_keeps_module_loaded() {
    let h = Harness::new(|j| recording_catalog(j, &["sensors"]));
    let path = write_folder_module(
        h.root(),
        "sensors",
        Some("items:\n  - {id: temp, type: sensor}\n  - {id: humidity, type: sensor}\n"),
    );
    h.manager.load_folder_module(&path, "sensors").await.unwrap();
    h.items.fail_removal_of("temp");

    let err = h.manager.unload("sensors").await.unwrap_err();
    assert!(matches!(err, ModuleError::ItemRemovalFailed { ref failures, .. } if failures.len() == 1));
    assert!(h.journal.position("stop:sensors").is_none(), "stop is not called");
    let summary = h.manager.descriptor("sensors").expect("still loaded");
    assert_eq!(summary.items, vec!["temp".to_string()]);
    assert_eq!(summary.state, ModuleState::Running);

    h.items.clear_failures();
    h.manager.unload("sensors").await.unwrap();
    assert!(!h.manager.is_loaded("sensors"));
}

#[tokio::test]
async fn test_stop_failure_propagates() {
    let h = Harness::new(|journal| {
        let journal = journal.clone();
        let mut catalog = crate::module_system::ModuleCatalog::new();
        catalog.register("stubborn", move || {
            Box::new(TestCode::failing(journal.clone(), FailAt::Stop)) as Box<dyn crate::module_system::ModuleCode>
        });
        catalog
    });
    let path = write_file_module(h.root(), "stubborn");
    h.manager.load_file_module(&path, "stubborn").await.unwrap();

    let err = h.manager.unload("stubborn").await.unwrap_err();
    assert!(matches!(err, ModuleError::LifecycleFailed { .. }));
    assert_eq!(h.manager.descriptor("stubborn").unwrap().state, ModuleState::Stopping);
}

#[tokio::test]
async fn test_unload_all_runs_in_reverse_load_order() {
    let h = Harness::new(|j| recording_catalog(j, &["a", "b", "c"]));
    for name in ["a", "b", "c"] {
        let path = write_file_module(h.root(), name);
        h.manager.load_file_module(&path, name).await.unwrap();
    }

    h.manager.unload_all().await.unwrap();
    assert_eq!(h.journal.matching("stop:"), vec!["stop:c", "stop:b", "stop:a"]);
    assert!(h.manager.is_empty());
}

#[tokio::test]
async fn test_load_directory_scans_and_skips() {
    let mut config = ModuleManagerConfig::default();
    config.blacklist = vec!["blocked".to_string()];
    let h = Harness::with_packages(
        |j| recording_catalog(j, &["alpha", "beta", "blocked", "gamma"]),
        ScriptedPackageManager::new(&[]),
        config,
    );
    write_folder_module(h.root(), "alpha", Some("meta: {name: Alpha}\n"));
    write_file_module(h.root(), "beta");
    write_folder_module(h.root(), "blocked", Some(""));
    write_folder_module(h.root(), "broken", None);
    write_file_module(h.root(), "gamma");
    write_folder_module(h.root(), "__pycache__", Some(""));
    write_folder_module(h.root(), ".hidden", Some(""));
    std::fs::write(h.root().join("README.md"), "notes").unwrap();

    let outcomes = h.manager.load_directory(h.root()).await.unwrap();

    let names: Vec<(String, bool)> = outcomes
        .iter()
        .map(|o| match o {
            Ok(summary) => (summary.name.clone(), true),
            Err(failure) => (failure.name.clone(), false),
        })
        .collect();
    assert_eq!(
        names,
        vec![
            ("alpha".to_string(), true),
            ("beta".to_string(), true),
            ("broken".to_string(), false),
            ("gamma".to_string(), true),
        ]
    );
    assert_eq!(
        h.manager.module_names(),
        vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()]
    );
}

#[tokio::test]
async fn test_load_directory_missing_folder_is_io_error() {
    let h = Harness::new(|_| crate::module_system::ModuleCatalog::new());
    let err = h
        .manager
        .load_directory(&h.root().join("does-not-exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::Io { .. }));
}

#[tokio::test]
async fn test_folder_is_on_search_path_only_while_loading() {
    let h = Harness::new(|j| recording_catalog(j, &["alpha"]));
    let path = write_folder_module(h.root(), "alpha", Some(""));

    h.manager.load_folder_module(&path, "alpha").await.unwrap();
    assert_eq!(h.manager.search_path(), vec![h.root().to_path_buf()]);
}

#[tokio::test]
async fn test_builtin_module_loads_without_path() {
    let h = Harness::new(|_| ModuleCatalog::new());
    let mut probe = h.probe();
    let code = TestCode::recording(h.journal.clone())
        .with_spec(SpecSource::Text("items: [{id: siren, type: alarm}]".to_string()));

    let summary = h.manager.load_builtin("alarm", Box::new(code)).await.unwrap();
    assert_eq!(summary.kind, ModuleKind::Builtin);
    assert_eq!(summary.path, None);
    assert_eq!(summary.items, vec!["siren".to_string()]);
    assert_eq!(h.packages.list_calls(), 0, "no requirements, nothing listed");

    let event = probe.next_of("module_loaded").await;
    assert_eq!(event.get("module").unwrap()["kind"], json!("builtin"));

    h.manager.unload("alarm").await.unwrap();
    assert!(h.items.inner().get("siren").await.is_none());
    assert_eq!(h.journal.matching("stop:"), vec!["stop:alarm"]);
}

#[tokio::test]
async fn test_refresh_picks_up_packages_installed_elsewhere() {
    let h = Harness::with_packages(
        |j| recording_catalog(j, &["lights"]),
        ScriptedPackageManager::new(&[]),
        ModuleManagerConfig::default(),
    );
    assert_eq!(h.manager.refresh_installed_packages().await.unwrap(), 0);

    h.packages.add_installed("requests", "2.31.0");
    assert_eq!(h.manager.refresh_installed_packages().await.unwrap(), 1);

    let path = write_folder_module(h.root(), "lights", Some(LIGHTS_SPEC));
    h.manager.load_folder_module(&path, "lights").await.unwrap();
    assert!(h.packages.installs().is_empty(), "the refreshed snapshot satisfies the requirement");
}

#[tokio::test]
async fn test_refresh_reports_listing_failure() {
    let h = Harness::with_packages(
        |_| ModuleCatalog::new(),
        ScriptedPackageManager::failing_listing(),
        ModuleManagerConfig::default(),
    );
    assert!(matches!(
        h.manager.refresh_installed_packages().await,
        Err(ModuleError::PackageListFailed { .. })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_load_directory_follows_symlinked_module_folders() {
    let h = Harness::new(|j| recording_catalog(j, &["alpha", "linked"]));
    let elsewhere = tempfile::tempdir().unwrap();
    write_folder_module(h.root(), "alpha", Some(""));
    let target = write_folder_module(elsewhere.path(), "linked", Some("meta: {name: Linked}\n"));
    std::os::unix::fs::symlink(&target, h.root().join("linked")).unwrap();

    let outcomes = h.manager.load_directory(h.root()).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(h.manager.module_names(), vec!["alpha", "linked"]);
    let linked = h.manager.descriptor("linked").unwrap();
    assert_eq!(linked.kind, ModuleKind::Folder);
    assert_eq!(linked.meta.name.as_deref(), Some("Linked"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_load_directory_reports_uninspectable_entry_and_continues() {
    let h = Harness::new(|j| recording_catalog(j, &["alpha", "gamma"]));
    let mut probe = h.probe();
    write_folder_module(h.root(), "alpha", Some(""));
    write_file_module(h.root(), "gamma");
    std::os::unix::fs::symlink(h.root().join("nowhere.so"), h.root().join("ghost.so")).unwrap();

    let outcomes = h.manager.load_directory(h.root()).await.unwrap();

    assert_eq!(outcomes.len(), 3);
    let failure = outcomes
        .iter()
        .find_map(|o| o.as_ref().err())
        .expect("the dangling link is reported");
    assert_eq!(failure.name, "ghost");
    assert_eq!(failure.stage, ModuleState::Discovered);
    assert!(matches!(failure.error, ModuleError::Io { .. }));
    assert_eq!(h.manager.module_names(), vec!["alpha", "gamma"]);

    let event = probe.next_of("module_not_loaded").await;
    assert_eq!(event.get("name"), Some(&json!("ghost")));
}

#[tokio::test]
async fn test_failure_stage_is_last_state_reached() {
    let h = Harness::with_packages(
        |j| recording_catalog(j, &["lights"]),
        ScriptedPackageManager::new(&[("requests", "2.31.0")]),
        ModuleManagerConfig::default(),
    );

    // Code the catalog does not know, without and with requirements
    let plain = write_folder_module(h.root(), "unknown", Some(""));
    let failure = h.manager.load_folder_module(&plain, "unknown").await.unwrap_err();
    assert!(matches!(failure.error, ModuleError::CodeNotFound { .. }));
    assert_eq!(failure.stage, ModuleState::Discovered);

    let with_requirements = write_folder_module(h.root(), "unknown2", Some("pip-requirements: [requests]\n"));
    let failure = h.manager.load_folder_module(&with_requirements, "unknown2").await.unwrap_err();
    assert!(matches!(failure.error, ModuleError::CodeNotFound { .. }));
    assert_eq!(failure.stage, ModuleState::DependenciesResolving);

    // Inline spec that does not parse fails once the code is loaded
    let code = TestCode::recording(h.journal.clone()).with_spec(SpecSource::Text("items: [{type: x}]".to_string()));
    let failure = h.manager.load_builtin("bad_spec", Box::new(code)).await.unwrap_err();
    assert_eq!(failure.stage, ModuleState::CodeLoaded);

    let code = TestCode::failing(h.journal.clone(), FailAt::Init);
    let failure = h.manager.load_builtin("bad_init", Box::new(code)).await.unwrap_err();
    assert_eq!(failure.stage, ModuleState::Composed);
    assert_eq!(failure.to_string(), format!("{} (after Composed)", failure.error));
}
