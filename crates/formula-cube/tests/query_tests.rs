use formula_cube::{
    ComplexType, Cube, DataId, DatumFilterSpec, DatumId, DimensionType, LoadArgs, QueryArgs,
    QuerySpec, Row, Value, ValueType,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn cube() -> Cube {
    Cube::new(
        ComplexType::new(vec![
            DimensionType::new("series", ValueType::Text),
            DimensionType::new("category", ValueType::Text),
            DimensionType::new("value", ValueType::Number),
        ])
        .unwrap(),
    )
}

fn load(cube: &mut Cube, rows: &[(&str, &str, f64)]) -> (DataId, Vec<DatumId>) {
    let data = cube.create_owner();
    let ids = cube
        .load(
            data,
            rows.iter().map(|(s, c, v)| {
                Row::new()
                    .with("series", *s)
                    .with("category", *c)
                    .with("value", *v)
            }),
            &LoadArgs::default(),
        )
        .unwrap();
    (data, ids)
}

/// Brute-force reference: every datum of `data` the compiled predicate accepts.
fn scan(cube: &Cube, data: DataId, spec: Option<&QuerySpec>, args: &QueryArgs) -> BTreeSet<DatumId> {
    let predicate = cube.compile_predicate(spec, args).unwrap();
    cube.data(data)
        .unwrap()
        .datums()
        .iter()
        .copied()
        .filter(|id| predicate.matches(cube, cube.datum(*id).unwrap()))
        .collect()
}

#[test]
fn query_on_one_series_uses_the_index() {
    let mut cube = cube();
    let (data, ids) = load(
        &mut cube,
        &[("A", "X", 1.0), ("B", "X", 2.0), ("A", "Y", 3.0)],
    );
    let spec: QuerySpec = DatumFilterSpec::new().with("series", ["A"]).into();
    let selection = cube.select(data, Some(&spec), &QueryArgs::default()).unwrap();
    assert_eq!(selection.indexed_filter_count(), 1);
    assert_eq!(
        selection.iter(&cube).collect::<Vec<_>>(),
        vec![ids[0], ids[2]]
    );
}

#[test]
fn state_filters_apply_to_indexed_results() {
    let mut cube = cube();
    let (data, ids) = load(
        &mut cube,
        &[("A", "X", 1.0), ("A", "Y", 2.0), ("B", "Y", 3.0)],
    );
    cube.set_selected(ids[1], true).unwrap();
    cube.set_visible(ids[0], false).unwrap();

    let spec: QuerySpec = DatumFilterSpec::new().with("series", ["A"]).into();
    assert_eq!(
        cube.datums(data, Some(&spec), &QueryArgs::new().with_selected(true))
            .unwrap(),
        vec![ids[1]]
    );
    assert_eq!(
        cube.datums(data, Some(&spec), &QueryArgs::new().with_visible(false))
            .unwrap(),
        vec![ids[0]]
    );
    assert_eq!(
        cube.datums(
            data,
            None,
            &QueryArgs::new().with_where(None, |d| d.number("value") > Some(1.5))
        )
        .unwrap(),
        vec![ids[1], ids[2]]
    );
}

#[test]
fn results_follow_the_requested_order() {
    let mut cube = cube();
    let (data, ids) = load(
        &mut cube,
        &[("B", "Y", 1.0), ("A", "X", 2.0), ("B", "X", 3.0), ("A", "Y", 4.0)],
    );
    let spec: QuerySpec = DatumFilterSpec::new()
        .with("series", ["A", "B"])
        .with("category", ["X", "Y"])
        .into();

    let by_category = QueryArgs::new().with_order_by(["category"]);
    assert_eq!(
        cube.datums(data, Some(&spec), &by_category).unwrap(),
        vec![ids[0], ids[3], ids[2], ids[1]]
    );
    let by_series = QueryArgs::new().with_order_by(["series"]);
    assert_eq!(
        cube.datums(data, Some(&spec), &by_series).unwrap(),
        vec![ids[0], ids[2], ids[3], ids[1]]
    );
}

#[test]
fn numeric_filters_accept_text_and_numbers() {
    let mut cube = cube();
    let (data, ids) = load(&mut cube, &[("A", "X", 10.0), ("B", "X", 20.0)]);
    let spec: QuerySpec = DatumFilterSpec::new()
        .with("value", [Value::from("10"), Value::from(20.0)])
        .into();
    assert_eq!(
        cube.datums(data, Some(&spec), &QueryArgs::default()).unwrap(),
        ids
    );
}

#[test]
fn where_views_are_queryable() {
    let mut cube = cube();
    let (data, ids) = load(
        &mut cube,
        &[("A", "X", 1.0), ("B", "X", 2.0), ("A", "Y", 3.0)],
    );
    let only_x: QuerySpec = DatumFilterSpec::new().with("category", ["X"]).into();
    let view = cube
        .where_view(data, Some(&only_x), &QueryArgs::default())
        .unwrap();
    assert_eq!(cube.data(view).unwrap().datums(), &[ids[0], ids[1]]);
    assert_eq!(cube.link_parent(view), Some(data));

    let only_a: QuerySpec = DatumFilterSpec::new().with("series", ["A"]).into();
    assert_eq!(
        cube.datums(view, Some(&only_a), &QueryArgs::default())
            .unwrap(),
        vec![ids[0]]
    );
    assert_eq!(cube.atom_count(view, "category").unwrap(), 1);
}

#[cfg(not(target_arch = "wasm32"))]
mod index_matches_scan {
    use super::*;
    use proptest::prelude::*;

    const SERIES: [&str; 4] = ["A", "B", "C", ""];
    const CATEGORIES: [&str; 3] = ["X", "Y", ""];

    fn arb_rows() -> impl Strategy<Value = Vec<(usize, usize, i32)>> {
        prop::collection::vec((0..SERIES.len(), 0..CATEGORIES.len(), -5i32..5), 0..24)
    }

    /// An index past the table stands for a value that never occurs.
    fn pick(table: &[&'static str], idx: usize) -> &'static str {
        table.get(idx).copied().unwrap_or("Z")
    }

    fn arb_filter() -> impl Strategy<Value = DatumFilterSpec> {
        (
            prop::collection::vec(0..SERIES.len() + 1, 0..3),
            prop::collection::vec(0..CATEGORIES.len() + 1, 0..3),
        )
            .prop_map(|(series, categories)| {
                let mut filter = DatumFilterSpec::new();
                if !series.is_empty() {
                    filter = filter.with("series", series.iter().map(|i| pick(&SERIES[..], *i)));
                }
                if !categories.is_empty() {
                    filter = filter.with(
                        "category",
                        categories.iter().map(|i| pick(&CATEGORIES[..], *i)),
                    );
                }
                filter
            })
    }

    proptest! {
        #[test]
        fn indexed_ids_equal_scanned_ids(
            rows in arb_rows(),
            filters in prop::collection::vec(arb_filter(), 1..3),
            selected in prop::collection::vec(any::<bool>(), 24),
            only_selected in any::<bool>(),
            by_series in any::<bool>(),
        ) {
            let mut cube = cube();
            let data = cube.create_owner();
            let ids = cube
                .load(
                    data,
                    rows.iter().map(|(s, c, v)| {
                        Row::new()
                            .with("series", SERIES[*s])
                            .with("category", CATEGORIES[*c])
                            .with("value", *v)
                    }),
                    &LoadArgs::default(),
                )
                .unwrap();
            for (id, pick) in ids.iter().zip(selected.iter()) {
                cube.set_selected(*id, *pick).unwrap();
            }

            let spec: QuerySpec = filters.into_iter().collect();
            let mut args = QueryArgs::new();
            if only_selected {
                args = args.with_selected(true);
            }
            if by_series {
                args = args.with_order_by(["series"]);
            }

            let indexed = cube.datums(data, Some(&spec), &args).unwrap();
            let unique: BTreeSet<DatumId> = indexed.iter().copied().collect();
            prop_assert_eq!(unique.len(), indexed.len());
            prop_assert_eq!(unique, scan(&cube, data, Some(&spec), &args));
        }
    }
}
