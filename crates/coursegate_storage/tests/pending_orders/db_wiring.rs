#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use coursegate_kernel_contracts::course::CourseId;
use coursegate_kernel_contracts::order::{Order, OrderId, OrderStatus};
use coursegate_kernel_contracts::UnixTimeMs;
use coursegate_storage::kv::{DurableKv, JsonFileKv};
use coursegate_storage::pending_orders::{PendingOrderMemory, PendingOrderMemoryConfig};
use coursegate_storage::repo::PendingOrderRepo;
use rust_decimal::Decimal;

fn store_path(label: &str) -> std::path::PathBuf {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be >= unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("coursegate_db_wiring_{seed}"))
        .join(format!("{label}.json"))
}

fn order(id: u64, course: u64, created_at: u64) -> Order {
    Order::v1(
        OrderId(id),
        format!("ORD-{id:04}"),
        CourseId(course),
        OrderStatus::Pending,
        Decimal::new(9900, 2),
        "EUR".to_string(),
        UnixTimeMs(created_at),
    )
    .unwrap()
}

fn repo(path: &std::path::Path) -> Box<dyn PendingOrderRepo> {
    Box::new(PendingOrderMemory::new(
        PendingOrderMemoryConfig::mvp_v1(),
        JsonFileKv::open(path).unwrap(),
    ))
}

#[test]
fn at_pending_db_01_memory_survives_reload() {
    let path = store_path("reload");
    repo(&path).remember_pending_order(&order(11, 42, 500));

    let reloaded = repo(&path);
    let record = reloaded.pending_order(CourseId(42)).unwrap();
    assert_eq!(record.order_id, OrderId(11));
    assert_eq!(record.code, "ORD-0011");
    assert_eq!(record.total, Decimal::new(9900, 2));
    assert_eq!(record.currency, "EUR");
    assert_eq!(record.created_at, UnixTimeMs(500));

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_pending_db_02_courses_are_isolated_and_clear_is_scoped() {
    let path = store_path("isolation");
    let repo = repo(&path);
    repo.remember_pending_order(&order(1, 10, 1));
    repo.remember_pending_order(&order(2, 20, 2));
    repo.clear_pending_order(CourseId(10));

    assert!(repo.pending_order(CourseId(10)).is_none());
    assert_eq!(
        repo.pending_order(CourseId(20)).map(|r| r.order_id),
        Some(OrderId(2))
    );

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_pending_db_03_corrupt_store_degrades_to_no_memory() {
    let path = store_path("corrupt");
    let kv = JsonFileKv::open(&path).unwrap();
    std::fs::write(kv.path(), "{\"pending-order:5\": 17").unwrap();
    let repo = PendingOrderMemory::new(PendingOrderMemoryConfig::mvp_v1(), kv);
    assert!(repo.pending_order(CourseId(5)).is_none());

    // The next write replaces the corrupt file and memory works again.
    repo.remember_pending_order(&order(5, 5, 5));
    assert_eq!(
        repo.pending_order(CourseId(5)).map(|r| r.order_id),
        Some(OrderId(5))
    );

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_pending_db_04_namespace_prefixes_stored_keys() {
    let path = store_path("namespace");
    let memory = PendingOrderMemory::new(
        PendingOrderMemoryConfig {
            namespace: "lms-pending".to_string(),
        },
        JsonFileKv::open(&path).unwrap(),
    );
    memory.remember(&order(3, 8, 3));
    let raw = JsonFileKv::open(&path).unwrap().get("lms-pending:8").unwrap();
    assert!(raw.is_some_and(|json| json.contains("\"orderId\":3")));

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
