use mediator_core::{
    Mediated, MediationConfig, MediationContext, MediationError, MediationResult, MediationTypes,
    Retention, StepKind,
};
use mediator_store::{MemoryStore, Record, RecordSchema, RecordSession};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Appends `event` to the record's `callbacks` list.
fn mark(record: &mut Record, event: &str) -> MediationResult<()> {
    record.push("callbacks", event)?;
    Ok(())
}

fn callbacks(record: &Record) -> Vec<String> {
    record
        .get::<Vec<String>>("callbacks")
        .unwrap()
        .unwrap_or_default()
}

fn clear_callbacks(record: &mut Record) {
    record.set("callbacks", json!([])).unwrap();
}

/// `thing` marks before / reconcile / cache on the record it mediates.
fn thing_types() -> MediationTypes<MemoryStore> {
    let mut types = MediationTypes::new();
    types
        .register("thing")
        .before("before", |r, _| Ok(mark(r, "before")?))
        .reconciles("reconcile", |r, _| Ok(mark(r, "reconcile")?))
        .caches("cache", |r, _| Ok(mark(r, "cache")?));
    types
}

// ── Saving ───────────────────────────────────────────────────────

#[test]
fn saving_a_new_record() {
    init_tracing();
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({"name": "new"}));

    ctx.save(&mut thing).unwrap();

    assert_eq!(callbacks(&thing), vec!["before", "reconcile", "cache"]);
    assert!(!thing.is_new());
    assert_eq!(thing.lock_version(), Some(1));
    assert_eq!(store.row_count(), 1);

    let stored = store.find("thing", thing.key().unwrap()).unwrap();
    assert_eq!(stored.lock_version(), Some(1));
    assert_eq!(stored.updated_at(), thing.updated_at());
}

#[test]
fn updating_an_existing_record() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({"name": "exists"}));
    ctx.save(&mut thing).unwrap();
    let first_touch = thing.updated_at().unwrap();

    for expected_version in 2..=3 {
        clear_callbacks(&mut thing);
        ctx.save(&mut thing).unwrap();
        assert_eq!(callbacks(&thing), vec!["before", "reconcile", "cache"]);
        assert_eq!(thing.lock_version(), Some(expected_version));
    }
    assert!(first_touch.is_before(&thing.updated_at().unwrap()));
    assert!(thing.created_at().unwrap().is_before(&first_touch));
}

#[test]
fn saving_a_loaded_instance() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({}));
    ctx.save(&mut thing).unwrap();

    let mut loaded = store.find("thing", thing.key().unwrap()).unwrap();
    clear_callbacks(&mut loaded);
    loaded.set("name", "renamed").unwrap();
    ctx.save(&mut loaded).unwrap();

    assert_eq!(callbacks(&loaded), vec!["before", "reconcile", "cache"]);
    let stored = store.find("thing", thing.key().unwrap()).unwrap();
    assert_eq!(stored.get::<String>("name").unwrap().as_deref(), Some("renamed"));
    assert_eq!(stored.lock_version(), Some(2));
}

#[test]
fn registrations_accumulate() {
    let mut types = thing_types();
    types
        .register("thing")
        .reconciles("foo", |_, _| Ok(()))
        .reconciles("bar", |_, _| Ok(()));
    types
        .register("thing")
        .reconciles("baz", |_, _| Ok(()))
        .reconciles("foo", |_, _| Ok(()));
    let types = types.build();

    assert_eq!(
        types.chain(&"thing".into()).names(StepKind::Reconcile),
        vec!["reconcile", "foo", "bar", "baz"]
    );
}

proptest! {
    #[test]
    fn repeated_saves_inside_one_operation_bump_once(saves in 1usize..12) {
        let store = MemoryStore::new();
        let ctx = MediationContext::new(&store, thing_types().build());
        let mut thing = store.new_record("thing", json!({}));

        ctx.mediated_transaction(&mut thing, |t| {
            for _ in 0..saves {
                ctx.save(t)?;
            }
            Ok(())
        })
        .unwrap();

        prop_assert_eq!(callbacks(&thing), vec!["before", "reconcile", "cache"]);
        prop_assert_eq!(thing.lock_version(), Some(1));
        prop_assert_eq!(store.row_count(), 1);
        prop_assert_eq!(ctx.mediator_count(), 0);
    }
}

// ── Touch and versioning ─────────────────────────────────────────

#[test]
fn touch_bumps_timestamped_versioned_records() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut foo = store.new_record("foo", json!({}));

    ctx.save(&mut foo).unwrap();
    assert_eq!(foo.lock_version(), Some(1));
    let saved_at = foo.updated_at().unwrap();

    ctx.touch(&mut foo).unwrap();
    assert_eq!(foo.lock_version(), Some(2));
    assert!(saved_at.is_before(&foo.updated_at().unwrap()));

    let stored = store.find("foo", foo.key().unwrap()).unwrap();
    assert_eq!(stored.lock_version(), Some(2));
    assert_eq!(stored.updated_at(), foo.updated_at());
}

#[test]
fn untimestamped_records_keep_their_version() {
    let mut store = MemoryStore::new();
    store.define(
        "untimestamped",
        RecordSchema {
            versioned: true,
            timestamped: false,
        },
    );
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("untimestamped", json!({"name": "one"}));

    ctx.save(&mut thing).unwrap();
    assert_eq!(thing.lock_version(), Some(0));
    ctx.touch(&mut thing).unwrap();
    assert_eq!(thing.lock_version(), Some(0));
    ctx.mediated_transaction(&mut thing, |_| Ok(())).unwrap();
    assert_eq!(thing.lock_version(), Some(0));
    assert_eq!(thing.updated_at(), None);
}

#[test]
fn unversioned_records_have_no_counter() {
    let mut store = MemoryStore::new();
    store.define(
        "unlocked",
        RecordSchema {
            versioned: false,
            timestamped: true,
        },
    );
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("unlocked", json!({}));

    ctx.save(&mut thing).unwrap();
    let created = thing.updated_at().unwrap();
    assert_eq!(thing.lock_version(), None);

    ctx.touch(&mut thing).unwrap();
    assert_eq!(thing.lock_version(), None);
    assert!(created.is_before(&thing.updated_at().unwrap()));
}

#[test]
fn plain_records_carry_no_bookkeeping() {
    let mut store = MemoryStore::new();
    store.define("plain", RecordSchema::PLAIN);
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("plain", json!({}));

    ctx.save(&mut thing).unwrap();
    ctx.touch(&mut thing).unwrap();

    assert_eq!(thing.lock_version(), None);
    assert_eq!(thing.created_at(), None);
    assert_eq!(thing.updated_at(), None);
}

#[test]
fn touching_an_unsaved_record_does_nothing() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({}));

    ctx.touch(&mut thing).unwrap();

    assert!(thing.is_new());
    assert_eq!(thing.lock_version(), Some(0));
    assert_eq!(store.row_count(), 0);
}

// ── Switches ─────────────────────────────────────────────────────

#[test]
fn type_switch_turns_mediation_off_and_on() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({}));

    ctx.disable_all_mediation("thing");
    ctx.save(&mut thing).unwrap();
    assert!(callbacks(&thing).is_empty());
    assert_eq!(thing.lock_version(), Some(0));
    assert_eq!(store.row_count(), 1);

    ctx.enable_all_mediation("thing");
    ctx.save(&mut thing).unwrap();
    assert_eq!(callbacks(&thing), vec!["before", "reconcile", "cache"]);
    assert_eq!(thing.lock_version(), Some(1));
}

#[test]
fn instance_switch_only_affects_that_instance() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut quiet = store.new_record("thing", json!({}));
    let mut loud = store.new_record("thing", json!({}));

    ctx.disable_mediation(&mut quiet);
    assert!(!quiet.mediation_enabled());
    ctx.save(&mut quiet).unwrap();
    ctx.save(&mut loud).unwrap();
    assert!(callbacks(&quiet).is_empty());
    assert_eq!(callbacks(&loud), vec!["before", "reconcile", "cache"]);

    ctx.enable_mediation(&mut quiet);
    ctx.save(&mut quiet).unwrap();
    assert_eq!(callbacks(&quiet), vec!["before", "reconcile", "cache"]);
}

#[test]
fn save_without_mediation_skips_everything_but_the_write() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({}));

    ctx.save_without_mediation(&mut thing).unwrap();

    assert!(callbacks(&thing).is_empty());
    assert_eq!(thing.lock_version(), Some(0));
    assert!(store.find("thing", thing.key().unwrap()).is_some());
}

#[test]
fn save_with_mediation_ignores_switches() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({}));

    ctx.disable_all_mediation("thing");
    ctx.disable_mediation(&mut thing);
    ctx.save_with_mediation(&mut thing).unwrap();

    assert_eq!(callbacks(&thing), vec!["before", "reconcile", "cache"]);
    assert_eq!(thing.lock_version(), Some(1));
}

// ── Hooks and nesting ────────────────────────────────────────────

#[test]
fn nested_mediation_from_hooks() {
    let mut store = MemoryStore::new();
    store
        .after_create("thing", |r, ctx| {
            ctx.mediated_transaction(r, |r| mark(r, "nested_create!"))
        })
        .after_save("thing", |r, ctx| {
            ctx.mediated_transaction(r, |r| mark(r, "nested_save!"))
        });
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({"name": "nested!"}));

    ctx.save(&mut thing).unwrap();

    // The last nested save comes from the touch that bumps the version.
    assert_eq!(
        callbacks(&thing),
        vec![
            "before",
            "nested_create!",
            "nested_save!",
            "reconcile",
            "cache",
            "nested_save!",
        ]
    );
    assert_eq!(thing.lock_version(), Some(1));
}

#[test]
fn nesting_before_create_is_rejected() {
    let mut store = MemoryStore::new();
    store.before_create("thing", |r, ctx| {
        ctx.mediated_transaction(r, |r| mark(r, "nested_before_create!"))
    });
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({}));

    let err = ctx.save(&mut thing).unwrap_err();

    assert!(err.is_identity_unavailable());
    assert!(matches!(err, MediationError::IdentityUnavailable { .. }));
    assert_eq!(callbacks(&thing), vec!["before"]);
    assert!(thing.is_new());
    assert_eq!(store.row_count(), 0);
    assert_eq!(ctx.mediator_count(), 0);
}

#[test]
fn after_create_sees_the_same_mediator_by_key() {
    let mut store = MemoryStore::new();
    store.after_create("thing", |r, ctx| {
        let Some(key) = r.key() else {
            return Err(MediationError::Storage("no key after create".into()));
        };
        let current = ctx.current_mediator(r);
        let loaded = ctx.host().find("thing", key);
        let same = loaded
            .as_ref()
            .is_some_and(|l| ctx.is_mediating(l) && ctx.current_mediator(l) == current);
        r.set("same_mediator", same)?;
        Ok(())
    });
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut thing = store.new_record("thing", json!({}));

    ctx.save(&mut thing).unwrap();

    assert_eq!(thing.get::<bool>("same_mediator").unwrap(), Some(true));
    assert_eq!(callbacks(&thing), vec!["before", "reconcile", "cache"]);
}

/// A step logging `<type>:<name>` into a shared log.
fn logger(
    log: &Arc<Mutex<Vec<String>>>,
    name: &'static str,
) -> impl Fn(&mut Record, &MediationContext<'_, MemoryStore>) -> anyhow::Result<()> + Send + Sync + 'static
{
    let log = Arc::clone(log);
    move |r, _| {
        log.lock().unwrap().push(format!("{}:{}", r.entity_type(), name));
        Ok(())
    }
}

#[test]
fn dependents_created_from_hooks_mediate_on_their_own() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut types = MediationTypes::<MemoryStore>::new();
    for entity_type in ["parent", "child"] {
        types
            .register(entity_type)
            .before("b", logger(&log, "b"))
            .reconciles("r", logger(&log, "r"))
            .caches("c", logger(&log, "c"));
    }
    types.register("parent").depends_on("child");

    let mut store = MemoryStore::new();
    store.after_create("parent", |parent, ctx| {
        let mut child = ctx.host().new_record("child", json!({ "parent": parent.key() }));
        ctx.save(&mut child)?;
        parent.set("child", child.key())?;
        Ok(())
    });
    let ctx = MediationContext::new(&store, types.build());
    let mut parent = store.new_record("parent", json!({}));

    ctx.save(&mut parent).unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "parent:b", "child:b", "child:r", "child:c", "parent:r", "parent:c",
        ]
    );
    assert_eq!(store.row_count(), 2);
    let stored = store.find("parent", parent.key().unwrap()).unwrap();
    let child_key = stored.get::<mediator_types::EntityKey>("child").unwrap().unwrap();
    let child = store.find("child", child_key).unwrap();
    assert_eq!(child.lock_version(), Some(1));
    assert_eq!(stored.lock_version(), Some(1));
}

// ── Rollback ─────────────────────────────────────────────────────

fn failing_types() -> MediationTypes<MemoryStore> {
    let mut types = thing_types();
    types.register("thing").reconciles("validate", |r, _| {
        if r.get::<bool>("fail")?.unwrap_or(false) {
            anyhow::bail!("validation failed");
        }
        Ok(())
    });
    types
}

#[test]
fn reconcile_failure_rolls_back_the_update() {
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, failing_types().build());
    let mut thing = store.new_record("thing", json!({"name": "before"}));
    ctx.save(&mut thing).unwrap();
    let key = thing.key().unwrap();

    thing.set("name", "after").unwrap();
    thing.set("fail", true).unwrap();
    let err = ctx.save(&mut thing).unwrap_err();

    assert!(matches!(
        err,
        MediationError::Step { kind: StepKind::Reconcile, ref step, .. } if step == "validate"
    ));
    let stored = store.find("thing", key).unwrap();
    assert_eq!(stored.get::<String>("name").unwrap().as_deref(), Some("before"));
    assert_eq!(stored.lock_version(), Some(1));
    assert_eq!(thing.lock_version(), Some(1));
    assert_eq!(thing.updated_at(), stored.updated_at());
    assert_eq!(ctx.mediator_count(), 0);
    assert!(!ctx.is_mediating(&thing));
}

#[test]
fn reconcile_failure_rolls_back_dependents() {
    let mut store = MemoryStore::new();
    store.after_create("thing", |_, ctx| {
        let mut child = ctx.host().new_record("child", json!({}));
        ctx.save(&mut child)
    });
    let ctx = MediationContext::new(&store, failing_types().build());
    let mut thing = store.new_record("thing", json!({"fail": true}));

    assert!(ctx.save(&mut thing).is_err());
    assert_eq!(store.row_count(), 0);
}

#[test]
fn retry_after_failed_create_inserts_the_record() {
    init_tracing();
    let store = MemoryStore::new();
    let ctx = MediationContext::new(&store, failing_types().build());
    let mut thing = store.new_record("thing", json!({"fail": true}));

    assert!(ctx.save(&mut thing).is_err());
    assert_eq!(store.row_count(), 0);
    assert!(thing.is_new());
    assert_eq!(thing.lock_version(), Some(0));
    assert_eq!(thing.created_at(), None);
    assert_eq!(thing.updated_at(), None);

    thing.set("fail", false).unwrap();
    ctx.save(&mut thing).unwrap();

    assert_eq!(store.row_count(), 1);
    assert_eq!(thing.lock_version(), Some(1));
    let stored = store.find("thing", thing.key().unwrap()).unwrap();
    assert_eq!(stored.lock_version(), Some(1));
}

#[test]
fn failed_touch_leaves_versions_in_sync() {
    let mut store = MemoryStore::new();
    store.after_save("foo", |r, _| {
        if r.get::<bool>("fail")?.unwrap_or(false) {
            return Err(anyhow::anyhow!("after_save rejected").into());
        }
        Ok(())
    });
    let ctx = MediationContext::new(&store, thing_types().build());
    let mut foo = store.new_record("foo", json!({}));
    ctx.save(&mut foo).unwrap();
    let key = foo.key().unwrap();

    foo.set("fail", true).unwrap();
    assert!(ctx.touch(&mut foo).is_err());

    let stored = store.find("foo", key).unwrap();
    assert_eq!(foo.lock_version(), Some(1));
    assert_eq!(foo.lock_version(), stored.lock_version());
    assert_eq!(foo.updated_at(), stored.updated_at());

    foo.set("fail", false).unwrap();
    ctx.touch(&mut foo).unwrap();
    assert_eq!(foo.lock_version(), Some(2));
    assert_eq!(store.find("foo", key).unwrap().lock_version(), Some(2));
}

#[test]
fn retained_mediators_are_shared_by_loaded_instances() {
    let store = MemoryStore::new();
    let config = MediationConfig::default().with_retention(Retention::RetainPersisted);
    let ctx = MediationContext::with_config(&store, thing_types().build(), config);
    let mut thing = store.new_record("thing", json!({}));
    ctx.save(&mut thing).unwrap();
    // Created without a key, so its Mediator was evicted.
    assert_eq!(ctx.mediator_count(), 0);

    let key = thing.key().unwrap();
    let mut first = store.find("thing", key).unwrap();
    let second = store.find("thing", key).unwrap();
    ctx.save(&mut first).unwrap();

    assert_eq!(ctx.mediator_count(), 1);
    assert_eq!(ctx.current_mediator(&first), ctx.current_mediator(&second));
    assert!(!ctx.is_mediating(&second));
}
