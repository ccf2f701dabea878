//! 立方体组装与导航：刷新后的汇总行 → Cube → 单元 / 树

use std::sync::Arc;

use chrono::NaiveDate;

use olap_summary_engine::common::OlapError;
use olap_summary_engine::config::{CubeConfig, EngineConfig};
use olap_summary_engine::cube::{Cube, CubeCell, CubeQuery, Filter, GroupingField, PLACEHOLDER_LABEL};
use olap_summary_engine::dirty::SourceEntity;
use olap_summary_engine::metadata::{
    DimensionMetadata, MeasureMetadata, MetadataProvider, MetadataRegistry, PartitionMetadata, SequenceKind,
    SummaryMetadata,
};
use olap_summary_engine::partition::{CalendarLevel, PartitionScheme};
use olap_summary_engine::store::{MemoryStore, ResultRow};
use olap_summary_engine::{SummaryEngine, Value};

fn sales() -> SummaryMetadata {
    SummaryMetadata::new(
        "sales", "order",
        PartitionMetadata::new("created", PartitionScheme::full_calendar()),
    )
    .with_dimension(DimensionMetadata::new("country", "country"))
    .with_dimension(DimensionMetadata::new("product", "product"))
    .with_dimension(DimensionMetadata::new("month", "created")
        .sequence(SequenceKind::Calendar(CalendarLevel::Month)))
    .with_measure(MeasureMetadata::sum("amount", "amount"))
    .with_measure(MeasureMetadata::count("orders"))
}

fn date(y: i32, m: u32, d: u32) -> Value {
    Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

/// 一月 NL A 10、NL B 5；三月 DE A 7、NL A 3
fn engine() -> SummaryEngine<MemoryStore> {
    let metadata: Arc<dyn MetadataProvider> = Arc::new(MetadataRegistry::new().with(sales()).unwrap());
    let mut engine = SummaryEngine::in_memory(metadata, EngineConfig::default()).unwrap();
    for (m, d, country, product, amount) in [
        (1, 10, "NL", "A", 10),
        (1, 20, "NL", "B", 5),
        (3, 5, "DE", "A", 7),
        (3, 6, "NL", "A", 3),
    ] {
        engine.insert(SourceEntity::new("order")
            .with("created", date(2024, m, d))
            .with("country", country)
            .with("product", product)
            .with("amount", amount as i64))
            .unwrap();
    }
    engine.refresh_dirty("sales").unwrap();
    engine
}

fn country_by_product() -> CubeQuery {
    CubeQuery::new("sales").with_dimension("country").with_dimension("product").with_measure("amount")
}

fn amount(cell: &CubeCell<'_>) -> Option<i64> {
    cell.measure("amount").and_then(Value::as_i64)
}

fn members(cube: &Cube, dimension: &str) -> Vec<Value> {
    cube.members(dimension).unwrap().iter().map(|d| d.member.clone()).collect()
}

// ── 组装 ──────────────────────────────────────────────────────────────────────

#[test]
fn cube_holds_detail_rows_and_every_subtotal() {
    let engine = engine();
    let cube = engine.query(&country_by_product()).unwrap();

    // 明细 3 + 国家小计 2 + 产品小计 2 + 顶点 1
    assert_eq!(cube.len(), 8);
    assert_eq!(amount(&cube.result()), Some(25));
    assert_eq!(members(&cube, "country"), [Value::from("DE"), Value::from("NL")]);
    assert_eq!(members(&cube, "product"), [Value::from("A"), Value::from("B")]);
}

#[test]
fn grouping_bits_follow_query_dimensions() {
    let g = GroupingField::decode("10", &["country", "product"]).unwrap();
    assert_eq!(g.grouping_fields(), ["country"]);
    assert_eq!(g.non_grouping_fields(), ["product"]);
    assert!(GroupingField::decode("1", &["country", "product"]).is_err());
}

#[test]
fn query_filter_restricts_source_rows() {
    let engine = engine();
    let query = country_by_product().with_filter(Filter::equals("country", "NL"));
    let cube = engine.query(&query).unwrap();
    assert_eq!(amount(&cube.result()), Some(18));
    assert_eq!(members(&cube, "country"), [Value::from("NL")]);
}

#[test]
fn missing_months_are_interpolated() {
    let engine = engine();
    let query = CubeQuery::new("sales").with_dimension("month").with_measure("amount");
    let cube = engine.query(&query).unwrap();

    assert_eq!(members(&cube, "month"), [date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1)]);
    let february = &cube.members("month").unwrap()[1];
    assert!(february.is_null);
    assert_eq!(february.label, PLACEHOLDER_LABEL);

    let cells = cube.cubes_by_dimensionality(&["month"]).unwrap();
    let totals: Vec<_> = cells.iter().map(amount).collect();
    assert_eq!(totals, [Some(15), None, Some(10)]);
    assert!(cells[1].is_null());

    let months: Vec<_> = cube.tree().children().iter().map(|n| n.is_null()).collect();
    assert_eq!(months, [false, true, false]);
}

// ── 单元导航 ──────────────────────────────────────────────────────────────────

#[test]
fn drill_down_walks_members_in_axis_order() {
    let engine = engine();
    let cube = engine.query(&country_by_product()).unwrap();

    let countries = cube.result().drill_down("country").unwrap();
    assert_eq!(countries.iter().map(amount).collect::<Vec<_>>(), [Some(7), Some(18)]);

    let nl = &countries[1];
    let products = nl.drill_down(1).unwrap();
    assert_eq!(products.iter().map(amount).collect::<Vec<_>>(), [Some(13), Some(5)]);

    // DE 没有 B：空单元
    let de_products = countries[0].drill_down("product").unwrap();
    assert_eq!(de_products.len(), 2);
    assert!(de_products[1].is_null());
    assert!(de_products[1].measures().is_empty());

    assert!(nl.drill_down("country").is_err());
    assert!(nl.drill_down(0).is_err());
    assert!(cube.result().drill_down("month").is_err());
}

#[test]
fn roll_up_then_drill_down_matches_dimensionality_query() {
    let engine = engine();
    let cube = engine.query(&country_by_product()).unwrap();
    let apex = cube.result();

    let via_navigation = apex.roll_up("country").unwrap().drill_down("country").unwrap();
    assert_eq!(via_navigation, cube.cubes_by_dimensionality(&["country"]).unwrap());

    let nl = apex.slice("country", &Value::from("NL")).unwrap().unwrap();
    assert_eq!(nl.roll_up("country").unwrap(), apex);

    let nl_b = nl.slice("product", &Value::from("B")).unwrap().unwrap();
    assert_eq!(nl_b.roll_up("product").unwrap(), nl);
    assert_eq!(amount(&nl_b.roll_up("country").unwrap()), Some(5));
}

#[test]
fn slice_and_find_fix_a_member() {
    let engine = engine();
    let cube = engine.query(&country_by_product()).unwrap();
    let apex = cube.result();

    let de = apex.slice("country", &Value::from("DE")).unwrap().unwrap();
    assert_eq!(amount(&de), Some(7));
    assert_eq!(de.member("country"), Some(&Value::from("DE")));
    assert!(apex.slice("country", &Value::from("FR")).unwrap().is_none());

    // slice 替换已固定的成员，find 不会
    let nl = de.slice("country", &Value::from("NL")).unwrap().unwrap();
    assert_eq!(amount(&nl), Some(18));
    assert!(de.find("country", &Value::from("NL")).unwrap().is_none());
    assert_eq!(de.find("country", &Value::from("DE")).unwrap(), Some(de.clone()));
    assert_eq!(amount(&de.find("product", &Value::from("A")).unwrap().unwrap()), Some(7));

    assert!(apex.slice("colour", &Value::from("red")).is_err());
}

#[test]
fn dice_limits_later_navigation() {
    let engine = engine();
    let cube = engine.query(&country_by_product()).unwrap();

    let diced = cube.result().dice(Filter::equals("country", "NL"));
    let countries = diced.drill_down("country").unwrap();
    assert_eq!(countries.len(), 1);
    assert_eq!(countries[0].member("country"), Some(&Value::from("NL")));
    assert!(diced.slice("country", &Value::from("DE")).unwrap().is_none());

    let narrower = diced.dice(Filter::equals("product", "B"));
    let products = narrower.drill_down("country").unwrap()[0].drill_down("product").unwrap();
    assert_eq!(products.iter().map(amount).collect::<Vec<_>>(), [Some(5)]);
}

#[test]
fn traverse_visits_every_combination_in_pre_order() {
    let engine = engine();
    let cube = engine.query(&country_by_product()).unwrap();

    let visited = cube.result().traverse();
    // 顶点 + 2 国家 + 2×2 产品
    assert_eq!(visited.len(), 7);
    assert_eq!(visited[1].member("country"), Some(&Value::from("DE")));
    assert_eq!(visited[2].member("product"), Some(&Value::from("A")));
    assert!(visited[3].is_null());
}

// ── 树 ────────────────────────────────────────────────────────────────────────

#[test]
fn tree_carries_subtotals_on_inner_nodes() {
    let engine = engine();
    let cube = engine.query(&country_by_product()).unwrap();
    let root = cube.tree();

    // 2 国家 + 3 产品 + 3 度量叶子
    assert_eq!(root.traverse().len(), 9);

    let de = root.child(&Value::from("DE")).unwrap();
    assert_eq!(de.measures().value("amount"), Some(&Value::Int64(7)));

    let b = root.find("product", &Value::from("B")).unwrap();
    let path: Vec<_> = b.path().dimensions().iter()
        .map(|d| (d.name.clone(), d.member.clone()))
        .collect();
    assert_eq!(path, [
        ("country".to_string(), Value::from("NL")),
        ("product".to_string(), Value::from("B")),
    ]);

    let leaves = root.get_children(-1).unwrap();
    assert_eq!(leaves.len(), 3);
    assert!(leaves.iter().all(|l| l.is_leaf()));
    assert_eq!(root.flatten().len(), 3);
}

// ── 上限 ──────────────────────────────────────────────────────────────────────

fn raw_rows(countries: &[(&str, i64)]) -> Vec<ResultRow> {
    countries.iter()
        .map(|(c, amount)| {
            let mut row = ResultRow::new();
            row.insert("country".into(), Value::from(*c));
            row.insert("amount".into(), Value::Int64(*amount));
            row
        })
        .collect()
}

#[test]
fn node_limit_stops_tree_growth() {
    let query = CubeQuery::new("sales").with_dimension("country").with_measure("amount");
    let config = CubeConfig { nodes_limit: 1, ..CubeConfig::default() };
    let err = Cube::build(&query, &sales(), raw_rows(&[("DE", 1), ("NL", 2)]), &config).unwrap_err();
    assert!(matches!(err, OlapError::InterpolationOverflow { limit: 1 }));
}

#[test]
fn oversized_result_is_rejected() {
    let query = CubeQuery::new("sales").with_dimension("country").with_measure("amount");
    let config = CubeConfig { query_result_limit: 2, ..CubeConfig::default() };
    let err = Cube::build(&query, &sales(), raw_rows(&[("DE", 1), ("NL", 2), ("BE", 3)]), &config).unwrap_err();
    assert!(matches!(err, OlapError::QueryResultOverflow { limit: 2, rows: 3 }));
}

#[test]
fn empty_store_gives_an_empty_cube() {
    let metadata: Arc<dyn MetadataProvider> = Arc::new(MetadataRegistry::new().with(sales()).unwrap());
    let engine = SummaryEngine::in_memory(metadata, EngineConfig::default()).unwrap();
    let cube = engine.query(&country_by_product()).unwrap();
    assert!(cube.is_empty());
    assert!(cube.result().is_null());
}
