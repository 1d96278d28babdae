use formula_cube::{
    ComplexType, Cube, DataId, DimensionType, Discriminator, GroupingSpec, LoadArgs, QueryArgs,
    Row, ValueType,
};
use pretty_assertions::assert_eq;

fn cube() -> Cube {
    Cube::new(
        ComplexType::new(vec![
            DimensionType::new("series", ValueType::Text),
            DimensionType::new("category", ValueType::Text),
            DimensionType::new("value", ValueType::Number),
            DimensionType::new("delta", ValueType::Number),
        ])
        .unwrap(),
    )
}

fn grouped(cube: &mut Cube, rows: &[(&str, &str, f64)], spec: &str) -> (DataId, DataId) {
    let data = cube.create_owner();
    cube.load(
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
    let root = cube
        .group_by(
            data,
            &GroupingSpec::parse(spec).unwrap(),
            &QueryArgs::default(),
        )
        .unwrap();
    (data, root)
}

#[test]
fn parent_sums_absolute_values_of_its_leaves() {
    let mut cube = cube();
    let (data, root) = grouped(
        &mut cube,
        &[("A", "X", 5.0), ("A", "Y", -3.0), ("B", "X", -2.0)],
        "series",
    );
    let value = Discriminator::dimension("value");
    let args = QueryArgs::default();

    assert_eq!(cube.dimension_number_value(root, &value, &args).unwrap(), 4.0);
    assert_eq!(cube.dimension_number_value(data, &value, &args).unwrap(), 0.0);

    let children = cube.data(root).unwrap().child_nodes().to_vec();
    assert_eq!(cube.dimension_number_value(children[0], &value, &args).unwrap(), 2.0);
    assert_eq!(cube.dimension_number_value(children[1], &value, &args).unwrap(), -2.0);
}

#[test]
fn percentages_of_siblings_add_up_to_one() {
    let mut cube = cube();
    let (_, root) = grouped(
        &mut cube,
        &[
            ("A", "X", 5.0),
            ("A", "Y", -1.0),
            ("B", "X", 2.0),
            ("C", "Y", -4.0),
        ],
        "series,category",
    );
    let value = Discriminator::dimension("value");
    let args = QueryArgs::default();
    assert_eq!(cube.dimension_percent_value(root, &value, &args).unwrap(), 1.0);

    let series = cube.data(root).unwrap().child_nodes().to_vec();
    let mut total = 0.0;
    for id in &series {
        total += cube.dimension_percent_value(*id, &value, &args).unwrap();
    }
    assert!((total - 1.0).abs() < 1e-12);

    let a_children = cube.data(series[0]).unwrap().child_nodes().to_vec();
    assert_eq!(
        cube.dimension_percent_value(a_children[1], &value, &args)
            .unwrap(),
        1.0 / 6.0
    );
}

#[test]
fn aggregates_follow_additive_loads() {
    let mut cube = cube();
    let (data, root) = grouped(&mut cube, &[("A", "X", 1.0)], "series");
    let value = Discriminator::dimension("value");
    let args = QueryArgs::default();
    assert_eq!(cube.dimension_number_value(root, &value, &args).unwrap(), 1.0);

    cube.add(
        data,
        [Row::new().with("series", "B").with("value", -3.0)],
        &LoadArgs::default(),
    )
    .unwrap();
    assert_eq!(cube.dimension_number_value(root, &value, &args).unwrap(), 4.0);
}

#[test]
fn discriminator_functions_pick_dimensions_per_node() {
    let mut cube = cube();
    let data = cube.create_owner();
    cube.load(
        data,
        [
            Row::new().with("series", "A").with("value", 2.0).with("delta", -7.0),
            Row::new().with("series", "B").with("value", 3.0).with("delta", 1.0),
        ],
        &LoadArgs::default(),
    )
    .unwrap();
    let root = cube
        .group_by(
            data,
            &GroupingSpec::parse("series").unwrap(),
            &QueryArgs::default(),
        )
        .unwrap();

    let by_series = Discriminator::function(
        |cube: &Cube, node: DataId, _: bool| {
            let label = cube.data(node)?.label().to_string();
            (label == "A").then(|| "delta".to_string())
        },
        Some("delta-for-a"),
        ["value"],
    );
    let args = QueryArgs::default();
    assert_eq!(cube.dimension_number_value(root, &by_series, &args).unwrap(), 10.0);

    let uncached = Discriminator::function(|_: &Cube, _: DataId, _: bool| None, None, ["value", "delta"]);
    assert_eq!(cube.dimension_number_value(data, &uncached, &args).unwrap(), -1.0);
}

#[test]
fn filters_restrict_the_summed_datums() {
    let mut cube = cube();
    let (data, root) = grouped(
        &mut cube,
        &[("A", "X", 5.0), ("A", "Y", -3.0), ("B", "X", -2.0)],
        "series",
    );
    let value = Discriminator::dimension("value");
    let positive = QueryArgs::new().with_where(Some("positive"), |d| {
        d.number("value").is_some_and(|v| v > 0.0)
    });
    assert_eq!(cube.dimension_number_value(root, &value, &positive).unwrap(), 5.0);

    let sum = cube.dimension_sum(data, "value", &QueryArgs::default()).unwrap();
    assert_eq!((sum.sum, sum.abs_sum), (0.0, 10.0));
}

#[cfg(not(target_arch = "wasm32"))]
mod hierarchy {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parents_equal_the_sum_of_absolute_children(
            rows in prop::collection::vec((0usize..3, 0usize..3, -50i32..50), 1..30),
        ) {
            let names = ["A", "B", "C"];
            let mut cube = cube();
            let data = cube.create_owner();
            cube.load(
                data,
                rows.iter().map(|(s, c, v)| {
                    Row::new()
                        .with("series", names[*s])
                        .with("category", names[*c])
                        .with("value", *v)
                }),
                &LoadArgs::default(),
            )
            .unwrap();
            let root = cube
                .group_by(data, &GroupingSpec::parse("series,category").unwrap(), &QueryArgs::default())
                .unwrap();
            let value = Discriminator::dimension("value");
            let args = QueryArgs::default();

            let mut pending = vec![root];
            while let Some(node) = pending.pop() {
                let children = cube.data(node).unwrap().child_nodes().to_vec();
                if children.is_empty() {
                    continue;
                }
                let mut expected = 0.0;
                for child in &children {
                    expected += cube.dimension_number_value(*child, &value, &args).unwrap().abs();
                }
                prop_assert_eq!(cube.dimension_number_value(node, &value, &args).unwrap(), expected);
                pending.extend(children);
            }

            let root_percent = cube.dimension_percent_value(root, &value, &args).unwrap();
            let root_value = cube.dimension_number_value(root, &value, &args).unwrap();
            prop_assert_eq!(root_percent, if root_value == 0.0 { 0.0 } else { 1.0 });
        }
    }
}
