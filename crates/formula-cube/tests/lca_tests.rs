use formula_cube::{
    ComplexType, Cube, DimensionType, GroupingSpec, LoadArgs, QueryArgs, Row, ValueType,
};
use pretty_assertions::assert_eq;

fn cube() -> Cube {
    Cube::new(
        ComplexType::new(vec![
            DimensionType::new("series", ValueType::Text),
            DimensionType::new("category", ValueType::Text),
        ])
        .unwrap(),
    )
}

#[test]
fn common_ancestors_in_a_grouping_tree() {
    let mut cube = cube();
    let data = cube.create_owner();
    cube.load(
        data,
        [
            Row::new().with("series", "A").with("category", "X"),
            Row::new().with("series", "A").with("category", "Y"),
            Row::new().with("series", "B").with("category", "X"),
        ],
        &LoadArgs::default(),
    )
    .unwrap();
    let root = cube
        .group_by(
            data,
            &GroupingSpec::parse("series,category").unwrap(),
            &QueryArgs::default(),
        )
        .unwrap();
    let series = cube.data(root).unwrap().child_nodes().to_vec();
    let a_categories = cube.data(series[0]).unwrap().child_nodes().to_vec();
    let b_categories = cube.data(series[1]).unwrap().child_nodes().to_vec();

    assert_eq!(cube.lca(&[a_categories[0]]), Some(a_categories[0]));
    assert_eq!(cube.lca(&[series[0], series[0]]), Some(series[0]));
    assert_eq!(cube.lca(&[a_categories[0], a_categories[1]]), Some(series[0]));
    assert_eq!(cube.lca(&[a_categories[1], b_categories[0]]), Some(root));
    assert_eq!(cube.lca(&[a_categories[0], series[0]]), Some(series[0]));
    assert_eq!(cube.lca(&[root, data]), Some(data));
    assert_eq!(cube.lca(&[b_categories[0], data]), Some(data));

    assert_eq!(
        cube.ancestors(a_categories[1]),
        vec![data, root, series[0], a_categories[1]]
    );
}

#[test]
fn unrelated_trees_have_no_common_ancestor() {
    let mut cube = cube();
    let first = cube.create_owner();
    let second = cube.create_owner();
    assert_eq!(cube.lca(&[first, second]), None);
    assert_eq!(cube.lca(&[]), None);

    cube.dispose(second).unwrap();
    assert_eq!(cube.ancestors(second), Vec::new());
    assert_eq!(cube.lca(&[first, second]), None);
}
