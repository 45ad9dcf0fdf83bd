use relmap::prelude::*;
use relmap::{CacheErrorKind, PairWrapper, VersionedWrapper};

#[derive(Debug, Clone)]
struct Order {
    id: i64,
    version: i32,
    name: String,
    amount: Option<i64>,
}

static ORDER_FIELDS: &[FieldSlot<Order>] = &[
    FieldSlot {
        name: "id",
        get: |o| Value::BigInt(o.id),
        set: |o, v| {
            o.id = v.try_into()?;
            Ok(())
        },
    },
    FieldSlot {
        name: "version",
        get: |o| Value::Int(o.version),
        set: |o, v| {
            o.version = v.try_into()?;
            Ok(())
        },
    },
    FieldSlot {
        name: "name",
        get: |o| Value::Text(o.name.clone()),
        set: |o, v| {
            o.name = v.try_into()?;
            Ok(())
        },
    },
    FieldSlot {
        name: "amount",
        get: |o| Value::from(o.amount),
        set: |o, v| {
            o.amount = v.try_into()?;
            Ok(())
        },
    },
];

static ORDER_ACCESSOR: FieldAccessor<Order> = FieldAccessor::new("Order", ORDER_FIELDS);

impl Entity for Order {
    fn accessor() -> &'static FieldAccessor<Self> {
        &ORDER_ACCESSOR
    }
}

/// A `province` row together with the `region` columns it inherits.
#[derive(Debug, Clone)]
struct Province {
    id: i64,
    region_code: Option<String>,
    version: i64,
    province_name: String,
}

static PROVINCE_FIELDS: &[FieldSlot<Province>] = &[
    FieldSlot {
        name: "id",
        get: |p| Value::BigInt(p.id),
        set: |p, v| {
            p.id = v.try_into()?;
            Ok(())
        },
    },
    FieldSlot {
        name: "region_code",
        get: |p| Value::from(p.region_code.clone()),
        set: |p, v| {
            p.region_code = v.try_into()?;
            Ok(())
        },
    },
    FieldSlot {
        name: "version",
        get: |p| Value::BigInt(p.version),
        set: |p, v| {
            p.version = v.try_into()?;
            Ok(())
        },
    },
    FieldSlot {
        name: "province_name",
        get: |p| Value::Text(p.province_name.clone()),
        set: |p, v| {
            p.province_name = v.try_into()?;
            Ok(())
        },
    },
];

static PROVINCE_ACCESSOR: FieldAccessor<Province> = FieldAccessor::new("Province", PROVINCE_FIELDS);

impl Entity for Province {
    fn accessor() -> &'static FieldAccessor<Self> {
        &PROVINCE_ACCESSOR
    }
}

struct Schema {
    registry: Arc<TableRegistry>,
    orders: TableId,
    region: TableId,
    province: TableId,
}

fn schema() -> Schema {
    let mut registry = TableRegistry::new();
    let orders = registry
        .register(TableMeta::new(
            "orders",
            vec![
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("version", "version", SqlType::Integer).version(true),
                FieldInfo::new("name", "name", SqlType::Text),
                FieldInfo::new("amount", "amount", SqlType::BigInt).nullable(true),
            ],
        ))
        .unwrap();
    let region = registry
        .register(TableMeta::new(
            "region",
            vec![
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("region_code", "region_code", SqlType::VarChar(16))
                    .unique(true)
                    .nullable(true),
                FieldInfo::new("version", "version", SqlType::BigInt).version(true),
            ],
        ))
        .unwrap();
    let province = registry
        .register(
            TableMeta::new(
                "province",
                vec![
                    FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                    FieldInfo::new("province_name", "province_name", SqlType::Text),
                ],
            )
            .parent(region),
        )
        .unwrap();
    Schema {
        registry: Arc::new(registry),
        orders,
        region,
        province,
    }
}

fn new_order(id: i64) -> Arc<Tracked<Order>> {
    Tracked::shared(Order {
        id,
        version: 0,
        name: "a".to_string(),
        amount: None,
    })
}

fn new_province(id: i64, code: &str) -> Arc<Tracked<Province>> {
    Tracked::shared(Province {
        id,
        region_code: Some(code.to_string()),
        version: 3,
        province_name: "Beijing".to_string(),
    })
}

#[test]
fn order_flush_advances_version() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let order = cache.put_if_absent(s.orders, new_order(1)).unwrap();

    order.mutate("set_name", |o| o.name = "b".to_string());
    order.mutate("set_amount", |o| o.amount = Some(10));

    let mut blocks = cache.changed_blocks().unwrap();
    assert_eq!(blocks.len(), 1);
    let block = blocks.pop().unwrap();
    assert_eq!(block.changed(), &["amount".to_string(), "name".to_string()]);
    assert_eq!(block.pre_version(), Some(&VersionValue::Int(0)));
    assert!(block.statement().has_version());

    block.success().unwrap();
    assert_eq!(order.read().version, 1);
    assert_eq!(cache.dirty_count(), 0);
    assert!(cache.changed_blocks().unwrap().is_empty());

    // The version write is not itself a change.
    assert!(!cache.entry(s.orders, &Value::BigInt(1)).unwrap().unwrap().is_dirty());
}

#[test]
fn province_resolves_by_id_and_inherited_unique_code() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let code = s.registry.resolve_field(s.province, "region_code").unwrap();
    assert_eq!(code.table, s.region);

    let cached = cache.put_if_absent(s.province, new_province(7, "CN-11")).unwrap();

    let by_id = cache.get::<Province>(s.province, &Value::BigInt(7)).unwrap().unwrap();
    let by_code = cache
        .get_by_unique::<Province>(s.province, code, &Value::from("CN-11"))
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&cached, &by_id));
    assert!(Arc::ptr_eq(&by_id, &by_code));

    let entry = cache.entry(s.province, &Value::BigInt(7)).unwrap().unwrap();
    assert_eq!(entry.aliases().len(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn unique_field_of_unrelated_table_is_rejected() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let code = s.registry.resolve_field(s.province, "region_code").unwrap();
    let err = cache
        .get_by_unique::<Order>(s.orders, code, &Value::from("CN-11"))
        .unwrap_err();
    assert_eq!(err.cache_kind(), Some(CacheErrorKind::UnrelatedTable));
}

#[test]
fn province_update_spans_both_tables() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let province = cache.put_if_absent(s.province, new_province(7, "CN-11")).unwrap();

    province.mutate("set_province_name", |p| p.province_name = "Hebei".to_string());
    province.mutate("set_region_code", |p| p.region_code = Some("CN-13".to_string()));

    let block = cache.changed_blocks().unwrap().pop().unwrap();
    let Statement::Pair(pair) = block.statement() else {
        panic!("expected a parent/child pair, got {:?}", block.statement());
    };
    assert_eq!(pair.order(), PairOrder::ParentFirst);
    assert_eq!(
        pair.parent().sql(),
        "UPDATE \"region\" SET \"region_code\" = $1, \"version\" = \"version\" + 1 \
         WHERE \"id\" = $2 AND \"version\" = $3"
    );
    assert_eq!(
        pair.parent().params(),
        &[Value::from("CN-13"), Value::BigInt(7), Value::BigInt(3)]
    );
    assert_eq!(
        pair.child().sql(),
        "UPDATE \"province\" SET \"province_name\" = $1 WHERE \"id\" = $2"
    );
    assert_eq!(pair.child().params()[1], Value::BigInt(7));
    assert_pair_addresses_same_row(pair);

    let versioned = block.statement().versioned_unit().unwrap();
    assert!(versioned.sql().starts_with("UPDATE \"region\""));
    assert!(block.is_conflict(0));
    assert!(!block.is_conflict(1));

    block.success().unwrap();
    assert_eq!(province.read().version, 4);
}

#[test]
fn province_instance_is_not_cached_again_as_region() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let province = cache.put_if_absent(s.province, new_province(7, "CN-11")).unwrap();

    let err = cache.put_if_absent(s.region, Arc::clone(&province)).unwrap_err();
    assert_eq!(err.cache_kind(), Some(CacheErrorKind::AlreadyTracked));
    assert!(err.is_usage_error());
    assert_eq!(cache.len(), 1);

    province.mutate("set_province_name", |p| p.province_name = "Hebei".to_string());
    assert_eq!(cache.dirty_count(), 1);
}

fn assert_pair_addresses_same_row(pair: &PairWrapper<VersionedWrapper>) {
    let parent_id = pair.parent().params().iter().find(|v| **v == Value::BigInt(7));
    let child_id = pair.child().params().iter().find(|v| **v == Value::BigInt(7));
    assert_eq!(parent_id, child_id);
}

#[test]
fn duplicate_notifications_yield_distinct_set() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let order = cache.put_if_absent(s.orders, new_order(1)).unwrap();

    for i in 0..5 {
        order.mutate("set_amount", |o| o.amount = Some(i));
        order.mutate("setName", |o| o.name = format!("n{i}"));
    }
    order.set("amount", Value::BigInt(99)).unwrap();

    let blocks = cache.changed_blocks().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].changed(), &["amount".to_string(), "name".to_string()]);
}

#[test]
fn rollback_then_new_mutations_are_tracked() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let order = cache.put_if_absent(s.orders, new_order(1)).unwrap();

    order.mutate("set_name", |o| o.name = "b".to_string());
    let blocks = cache.changed_blocks().unwrap();
    drop(blocks);
    cache.clear_changed_on_rollback();
    assert!(cache.changed_blocks().unwrap().is_empty());
    assert_eq!(order.read().version, 0);

    order.mutate("set_amount", |o| o.amount = Some(1));
    let blocks = cache.changed_blocks().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].changed(), &["amount".to_string()]);
    assert_eq!(blocks[0].pre_version(), Some(&VersionValue::Int(0)));
}

#[test]
fn distinct_ids_give_distinct_entries() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let a = cache.put_if_absent(s.orders, new_order(1)).unwrap();
    let b = cache.put_if_absent(s.orders, new_order(2)).unwrap();
    let a_again = cache.put_if_absent(s.orders, new_order(1)).unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &a_again));
    assert_eq!(cache.len(), 2);

    // Only the cached instance is tracked.
    a.mutate("set_name", |o| o.name = "x".to_string());
    assert_eq!(cache.dirty_count(), 1);
}

#[test]
fn only_dirty_rows_produce_blocks() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let orders: Vec<_> = (1..=4)
        .map(|id| cache.put_if_absent(s.orders, new_order(id)).unwrap())
        .collect();
    orders[1].mutate("set_name", |o| o.name = "x".to_string());
    orders[3].mutate("set_name", |o| o.name = "y".to_string());

    let mut ids: Vec<Value> = cache
        .changed_blocks()
        .unwrap()
        .iter()
        .map(|b| b.entry().id().clone())
        .collect();
    ids.sort_by_key(|v| v.as_i64());
    assert_eq!(ids, vec![Value::BigInt(2), Value::BigInt(4)]);
}

#[test]
fn session_close_forgets_rows_and_aliases() {
    let s = schema();
    let cache = LocalIdentityCache::new(s.registry.clone());
    let code = s.registry.resolve_field(s.province, "region_code").unwrap();
    let province = cache.put_if_absent(s.province, new_province(7, "CN-11")).unwrap();

    cache.clear_on_session_close();
    assert!(cache.is_empty());
    assert!(cache.get::<Province>(s.province, &Value::BigInt(7)).unwrap().is_none());
    assert!(cache
        .get_by_unique::<Province>(s.province, code, &Value::from("CN-11"))
        .unwrap()
        .is_none());

    province.mutate("set_province_name", |p| p.province_name = "x".to_string());
    assert!(cache.changed_blocks().unwrap().is_empty());
}
