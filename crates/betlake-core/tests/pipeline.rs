//! End-to-end merge runs against the in-memory store: two consecutive days
//! where the second day re-settles a bet onto a different settlement date.

use bytes::Bytes;
use polars::df;
use polars::prelude::*;

use betlake_bucket::{BucketStore, MemoryBucketStore};
use betlake_core::merge::read_partition;
use betlake_core::partition::to_parquet_bytes;
use betlake_core::run::{bootstrap_control, run_day};
use betlake_core::Config;

fn test_config() -> Config {
    Config {
        source_bucket: "src".into(),
        source_table: "zero".into(),
        raw_bucket: "raw".into(),
        raw_table: "raw_db".into(),
        analytic_bucket: "lake".into(),
        analytic_table: "bd_bets".into(),
        day_batch: None,
        raw_batch_size: 400_000,
        raw_partition_size: 100_000,
        merge_partition_size: 800_000,
    }
}

struct RawBet {
    customer: &'static str,
    trans_id: i64,
    status: &'static str,
    trans_date: &'static str,
    modify_date: &'static str,
    winlostdate: Option<&'static str>,
    ruben: i32,
}

async fn seed_raw_day(store: &MemoryBucketStore, config: &Config, day: &str, bets: &[RawBet]) {
    let mut frame = df![
        "customer" => bets.iter().map(|b| b.customer).collect::<Vec<_>>(),
        "transId" => bets.iter().map(|b| b.trans_id).collect::<Vec<_>>(),
        "status" => bets.iter().map(|b| b.status).collect::<Vec<_>>(),
        "transDate" => bets.iter().map(|b| b.trans_date).collect::<Vec<_>>(),
        "modifyDate" => bets.iter().map(|b| b.modify_date).collect::<Vec<_>>(),
        "winlostdate" => bets.iter().map(|b| b.winlostdate).collect::<Vec<_>>(),
    ]
    .expect("construct frame");
    frame
        .with_column(Series::new(
            "ruben".into(),
            bets.iter().map(|b| b.ruben).collect::<Vec<_>>(),
        ))
        .expect("ruben");

    let bytes = to_parquet_bytes(&frame).expect("serialize");
    let key = format!(
        "{}batch=000000000000/part_000000000000.snappy.parquet",
        config.raw_day_prefix(day)
    );
    store
        .put_object(&config.raw_bucket, &key, Bytes::from(bytes))
        .await
        .expect("seed raw day");
}

async fn analytics_partition(
    store: &MemoryBucketStore,
    config: &Config,
    year: i32,
    month: i32,
    day: i32,
) -> Option<DataFrame> {
    let prefix = format!(
        "{}/year={year:04}/month={month:02}/day={day:02}/",
        config.analytics_prefix()
    );
    read_partition(store, &config.analytic_bucket, &prefix)
        .await
        .expect("read analytics partition")
}

#[tokio::test]
async fn resettlement_moves_a_bet_between_analytics_partitions() {
    let store = MemoryBucketStore::new();
    let config = test_config();
    bootstrap_control(&store, &config, "20240305")
        .await
        .expect("bootstrap control");

    // Day one: an eligible settled bet and an ineligible one.
    seed_raw_day(
        &store,
        &config,
        "20240305",
        &[
            RawBet {
                customer: "a",
                trans_id: 1,
                status: "won",
                trans_date: "2024-03-05T12:00:00",
                modify_date: "2024-03-05T12:30:00",
                winlostdate: Some("2024-03-07T00:00:00"),
                ruben: 1,
            },
            RawBet {
                customer: "b",
                trans_id: 2,
                status: "won",
                trans_date: "2024-03-05T13:00:00",
                modify_date: "2024-03-05T13:30:00",
                winlostdate: Some("2024-03-07T00:00:00"),
                ruben: 0,
            },
        ],
    )
    .await;

    let report = run_day(&store, &config, "20240305").await.expect("run day one");
    assert_eq!(report.rows, 2);
    assert_eq!(report.relocated, 0);

    // Both rows reach master, only the eligible one reaches analytics.
    let master = read_partition(
        &store,
        &config.analytic_bucket,
        &format!("{}/year=2024/month=03/day=05/", config.master_prefix()),
    )
    .await
    .expect("read master partition")
    .expect("master partition present");
    assert_eq!(master.height(), 2);

    let analytics = analytics_partition(&store, &config, 2024, 3, 7)
        .await
        .expect("analytics partition present");
    assert_eq!(analytics.height(), 1);

    // Day two: the same bet is re-settled onto a new date.
    seed_raw_day(
        &store,
        &config,
        "20240306",
        &[RawBet {
            customer: "a",
            trans_id: 1,
            status: "lose",
            trans_date: "2024-03-05T12:00:00",
            modify_date: "2024-03-06T10:00:00",
            winlostdate: Some("2024-03-08T00:00:00"),
            ruben: 1,
        }],
    )
    .await;

    let report = run_day(&store, &config, "20240306").await.expect("run day two");
    assert_eq!(report.rows, 1);
    assert_eq!(report.relocated, 1);

    // The bet left its old settlement partition and landed in the new one.
    assert!(analytics_partition(&store, &config, 2024, 3, 7).await.is_none());
    let moved = analytics_partition(&store, &config, 2024, 3, 8)
        .await
        .expect("new analytics partition present");
    assert_eq!(moved.height(), 1);
    let status = moved.column("Status").unwrap().str().unwrap();
    assert_eq!(status.get(0), Some("LOSE"));

    // Master keeps one row per key with the latest settlement.
    let master = read_partition(
        &store,
        &config.analytic_bucket,
        &format!("{}/year=2024/month=03/day=05/", config.master_prefix()),
    )
    .await
    .expect("read master partition")
    .expect("master partition present");
    assert_eq!(master.height(), 2);
    let statuses: Vec<Option<&str>> = {
        let customers = master.column("Customer").unwrap().str().unwrap();
        let status = master.column("Status").unwrap().str().unwrap();
        (0..master.height())
            .filter(|&idx| customers.get(idx) == Some("a"))
            .map(|idx| status.get(idx))
            .collect()
    };
    assert_eq!(statuses, vec![Some("LOSE")]);
}

#[tokio::test]
async fn control_log_advances_across_runs() {
    let store = MemoryBucketStore::new();
    let config = test_config();
    bootstrap_control(&store, &config, "20240305")
        .await
        .expect("bootstrap control");

    seed_raw_day(
        &store,
        &config,
        "20240305",
        &[RawBet {
            customer: "a",
            trans_id: 1,
            status: "running",
            trans_date: "2024-03-05T12:00:00",
            modify_date: "2024-03-05T12:30:00",
            winlostdate: None,
            ruben: 1,
        }],
    )
    .await;

    run_day(&store, &config, "20240305").await.expect("run");

    let control = betlake_core::control::read_control(
        &store,
        &config.raw_bucket,
        &config.control_key(),
    )
    .await
    .expect("read control");
    assert_eq!(control.height(), 2);

    let pending = betlake_core::control::next_pending(&control).expect("pending entry");
    assert_eq!(pending.day, "20240306");

    let types = control.column("insertion_type").unwrap().str().unwrap();
    assert_eq!(types.get(0), Some("STANDARD"));
    let registers = control.column("n_registers").unwrap().u32().unwrap();
    assert_eq!(registers.get(0), Some(1));

    // A running, unsettled bet has no analytics partition yet.
    assert!(analytics_partition(&store, &config, 2024, 3, 7).await.is_none());
}

#[tokio::test]
async fn mismatched_run_schedules_from_the_claimed_entry() {
    let store = MemoryBucketStore::new();
    let config = test_config();
    bootstrap_control(&store, &config, "20240305")
        .await
        .expect("bootstrap control");

    seed_raw_day(
        &store,
        &config,
        "20240306",
        &[RawBet {
            customer: "a",
            trans_id: 1,
            status: "running",
            trans_date: "2024-03-06T12:00:00",
            modify_date: "2024-03-06T12:30:00",
            winlostdate: None,
            ruben: 1,
        }],
    )
    .await;

    // The pending control entry says 20240305 but the run processes 20240306.
    run_day(&store, &config, "20240306").await.expect("run");

    // The next slot follows the claimed entry, so no day is skipped.
    let control = betlake_core::control::read_control(
        &store,
        &config.raw_bucket,
        &config.control_key(),
    )
    .await
    .expect("read control");
    let pending = betlake_core::control::next_pending(&control).expect("pending entry");
    assert_eq!(pending.day, "20240306");
}
