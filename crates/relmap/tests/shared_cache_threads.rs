use std::thread;

use relmap::prelude::*;

#[derive(Debug)]
struct Counter {
    id: i64,
    version: i64,
    hits: i64,
}

static COUNTER_FIELDS: &[FieldSlot<Counter>] = &[
    FieldSlot {
        name: "id",
        get: |c| Value::BigInt(c.id),
        set: |c, v| {
            c.id = v.try_into()?;
            Ok(())
        },
    },
    FieldSlot {
        name: "version",
        get: |c| Value::BigInt(c.version),
        set: |c, v| {
            c.version = v.try_into()?;
            Ok(())
        },
    },
    FieldSlot {
        name: "hits",
        get: |c| Value::BigInt(c.hits),
        set: |c, v| {
            c.hits = v.try_into()?;
            Ok(())
        },
    },
];

static COUNTER_ACCESSOR: FieldAccessor<Counter> = FieldAccessor::new("Counter", COUNTER_FIELDS);

impl Entity for Counter {
    fn accessor() -> &'static FieldAccessor<Self> {
        &COUNTER_ACCESSOR
    }
}

fn registry() -> (Arc<TableRegistry>, TableId) {
    let mut registry = TableRegistry::new();
    let counters = registry
        .register(TableMeta::new(
            "counters",
            vec![
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("version", "version", SqlType::BigInt).version(true),
                FieldInfo::new("hits", "hits", SqlType::BigInt),
            ],
        ))
        .unwrap();
    (Arc::new(registry), counters)
}

#[test]
fn concurrent_registration_of_one_id_yields_one_entry() {
    let (registry, counters) = registry();
    let cache = SharedIdentityCache::new(registry);
    let shared = &cache;

    let winners: Vec<Arc<Tracked<Counter>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(move || {
                    let instance = Tracked::shared(Counter {
                        id: 1,
                        version: 0,
                        hits: 0,
                    });
                    shared.put_if_absent(counters, instance).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(cache.len(), 1);
    let first = &winners[0];
    assert!(winners.iter().all(|w| Arc::ptr_eq(w, first)));
    assert!(first.is_tracked());
}

#[test]
fn mutations_from_many_threads_land_in_one_block() {
    let (registry, counters) = registry();
    let cache = SharedIdentityCache::new(registry);
    let counter = cache
        .put_if_absent(
            counters,
            Tracked::shared(Counter {
                id: 1,
                version: 5,
                hits: 0,
            }),
        )
        .unwrap();

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..100 {
                    counter.mutate("set_hits", |c| c.hits += 1);
                }
            });
        }
    });

    let mut blocks = cache.changed_blocks().unwrap();
    assert_eq!(blocks.len(), 1);
    let block = blocks.pop().unwrap();
    assert_eq!(block.changed(), &["hits".to_string()]);
    let Statement::Single(unit) = block.statement() else {
        panic!("expected a single unit");
    };
    assert_eq!(unit.params()[0], Value::BigInt(400));

    assert_eq!(block.success().unwrap(), Some(VersionValue::BigInt(6)));
    assert_eq!(counter.read().version, 6);
    assert_eq!(cache.dirty_count(), 0);
}
