//! # olap-summary-engine 使用案例
//!
//! 1. 声明汇总类（日历分区 + 维度 + 度量）
//! 2. 写入源数据，自动记录脏标记
//! 3. 增量刷新：新数据 → 脏分区 → 逐层汇总
//! 4. 补录历史数据后再次刷新
//! 5. 手动区间刷新（分批 + 断点续刷）
//! 6. 立方体查询与导航
//! 7. 快照落盘与恢复
//!
//! 运行：`RUST_LOG=debug cargo run --example summary_cube`

use std::sync::Arc;

use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

use olap_summary_engine::{
    config::EngineConfig,
    cube::{CubeCell, CubeQuery, Filter},
    dirty::SourceEntity,
    metadata::{
        DimensionMetadata, MeasureMetadata, MetadataProvider, MetadataRegistry, PartitionMetadata,
        SequenceKind, SummaryMetadata,
    },
    partition::{CalendarLevel, PartitionScheme},
    refresh::ManualRefresh,
    store::{MemoryStore, SummaryStore},
    SummaryEngine, Value,
};

fn order(y: i32, m: u32, d: u32, country: &str, product: &str, amount: i64) -> SourceEntity {
    let created = NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);
    SourceEntity::new("order")
        .with("created", created)
        .with("country", country)
        .with("product", product)
        .with("amount", amount)
}

fn show(cell: &CubeCell<'_>) -> String {
    match cell.measure("amount") {
        Some(v) => format!("{cell:?} amount={v}"),
        None    => format!("{cell:?}"),
    }
}

fn main() -> olap_summary_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("═══════════════════════════════════════════════════════════");
    println!("   olap-summary-engine 演示                                ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 汇总类
    // =========================================================================
    println!("【1】声明汇总类 `sales` ...");
    let sales = SummaryMetadata::new(
        "sales", "order",
        PartitionMetadata::new("created", PartitionScheme::full_calendar()),
    )
    .with_dimension(DimensionMetadata::new("country", "country").with_label("国家"))
    .with_dimension(DimensionMetadata::new("product", "product").with_label("产品"))
    .with_dimension(DimensionMetadata::new("month", "created")
        .with_label("月份")
        .sequence(SequenceKind::Calendar(CalendarLevel::Month)))
    .with_measure(MeasureMetadata::sum("amount", "amount").with_label("金额"))
    .with_measure(MeasureMetadata::count("orders").with_label("订单数"));
    let metadata: Arc<dyn MetadataProvider> = Arc::new(MetadataRegistry::new().with(sales)?);
    let mut engine = SummaryEngine::in_memory(Arc::clone(&metadata), EngineConfig::default())?;
    println!("    ✓ 日 → 月 → 季 → 年\n");

    // =========================================================================
    // 2. 源数据
    // =========================================================================
    println!("【2】写入订单 ...");
    for entity in [
        order(2024, 1, 10, "NL", "A", 10),
        order(2024, 1, 31, "DE", "B", 4),
        order(2024, 2, 5,  "NL", "A", 1),
        order(2024, 4, 2,  "DE", "A", 7),
    ] {
        let id = engine.insert(entity)?;
        println!("    row #{id}");
    }
    println!("    dirty flags = {}\n", engine.store().dirty_flags("sales")?.len());

    // =========================================================================
    // 3. 增量刷新
    // =========================================================================
    println!("【3】增量刷新 ...");
    let report = engine.refresh_dirty("sales")?;
    println!("    ranges       = {:?}", report.ranges);
    println!("    marked_upper = {}", report.marked_upper);
    println!("    latest       = {:?}\n", engine.store().latest_key("sales")?);

    // =========================================================================
    // 4. 补录
    // =========================================================================
    println!("【4】补录 2024-01-20 的订单并刷新 ...");
    engine.insert(order(2024, 1, 20, "NL", "B", 100))?;
    let report = engine.refresh_dirty("sales")?;
    println!("    ranges = {:?}\n", report.ranges);

    // =========================================================================
    // 5. 手动刷新
    // =========================================================================
    println!("【5】手动刷新 2024-04-01 ..= 2024-06-30，每批 30 个分区 ...");
    let request = ManualRefresh::new()
        .from(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap_or(NaiveDate::MIN))
        .to(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap_or(NaiveDate::MIN))
        .batch_size(30);
    let report = engine.refresh("sales", &request)?;
    for r in &report.ranges {
        println!("    batch {r}");
    }
    if let Some(second) = report.ranges.get(1) {
        let resumed = engine.refresh("sales", &request.clone().resume_from(second))?;
        println!("    resume from {second}: skipped {}", resumed.skipped.len());
    }
    println!("    caught_up = {}\n", report.caught_up);

    // =========================================================================
    // 6. 立方体
    // =========================================================================
    println!("【6】查询 country × product ...");
    let query = CubeQuery::new("sales")
        .with_dimension("country")
        .with_dimension("product")
        .with_measure("amount");
    let cube = engine.query(&query)?;
    let apex = cube.result();
    println!("    {}", show(&apex));
    for country in apex.drill_down("country")? {
        println!("      {}", show(&country));
        for product in country.drill_down("product")? {
            println!("        {}", show(&product));
        }
    }
    if let Some(nl_a) = apex.find("country", &Value::from("NL"))?
        .map(|nl| nl.find("product", &Value::from("A")))
        .transpose()?
        .flatten()
    {
        println!("    find NL/A: {}", show(&nl_a));
    }
    let diced = apex.dice(Filter::equals("product", "B"));
    println!("    dice product=B: {:?}", diced.drill_down("country")?.iter().map(show).collect::<Vec<_>>());

    println!("\n    按月（缺月插值）：");
    let monthly = engine.query(&CubeQuery::new("sales").with_dimension("month").with_measure("amount"))?;
    for node in monthly.tree().children() {
        let label = node.dimension().map(|d| d.display_member.to_string()).unwrap_or_default();
        let amount = node.measures().value("amount").map(Value::to_string).unwrap_or_else(|| "-".into());
        println!("      {label:<12} {amount}");
    }
    println!();

    // =========================================================================
    // 7. 快照
    // =========================================================================
    println!("【7】快照落盘与恢复 ...");
    let path = std::env::temp_dir().join("olap-summary-demo.snap");
    engine.store().save_snapshot(&path)?;
    let store = MemoryStore::open(Arc::clone(&metadata), &path)?;
    let restored = SummaryEngine::new(metadata, store, EngineConfig::default())?;
    let total = restored.query(&query)?.result().measure("amount").cloned().unwrap_or(Value::Null);
    println!("    {} → total amount = {total}", path.display());
    std::fs::remove_file(&path)?;

    println!("\n✓ 完成");
    Ok(())
}
