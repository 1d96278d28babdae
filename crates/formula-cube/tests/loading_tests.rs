use formula_cube::{
    ComplexType, Cube, CubeError, DataId, DatumId, DimensionType, LoadArgs, QueryArgs, Row,
    SlidingWindow, Value, ValueType,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

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

fn row(series: &str, category: &str, value: f64) -> Row {
    Row::new()
        .with("series", series)
        .with("category", category)
        .with("value", value)
}

fn series_of(cube: &Cube, data: DataId) -> Vec<String> {
    cube.data(data)
        .unwrap()
        .datums()
        .iter()
        .map(|id| {
            cube.datum_view(*id)
                .unwrap()
                .value("series")
                .to_string()
        })
        .collect()
}

#[test]
fn identical_rows_collapse_to_one_datum() {
    let mut cube = cube();
    let data = cube.create_owner();
    let added = cube
        .load(
            data,
            [row("A", "X", 10.0), row("A", "X", 10.0)],
            &LoadArgs::default(),
        )
        .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(cube.data(data).unwrap().datum_count(), 1);
}

#[test]
fn additive_loads_keep_the_first_datum_per_key() {
    let mut cube = cube();
    let data = cube.create_owner();
    let first = cube
        .add(data, [row("A", "X", 1.0)], &LoadArgs::default())
        .unwrap();
    let second = cube
        .add(
            data,
            [row("A", "X", 1.0), row("B", "X", 2.0)],
            &LoadArgs::default(),
        )
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(
        cube.data(data).unwrap().datums(),
        &[first[0], second[0]]
    );
    assert_eq!(series_of(&cube, data), vec!["A", "B"]);
}

#[test]
fn replace_load_reuses_datums_with_the_same_key() {
    let mut cube = cube();
    let data = cube.create_owner();
    let first = cube
        .load(
            data,
            [row("A", "X", 1.0), row("B", "X", 2.0)],
            &LoadArgs::default(),
        )
        .unwrap();
    cube.set_selected(first[1], true).unwrap();

    let second = cube
        .load(
            data,
            [row("B", "X", 2.0), row("C", "Y", 3.0)],
            &LoadArgs::default(),
        )
        .unwrap();
    assert_eq!(second[0], first[1]);
    assert!(cube.datum(second[0]).unwrap().is_selected());
    assert!(cube.datum(first[0]).is_none());
    assert_eq!(series_of(&cube, data), vec!["B", "C"]);
}

#[test]
fn load_predicates_filter_and_mark_null_datums() {
    let mut cube = cube();
    let data = cube.create_owner();
    let args = LoadArgs::new()
        .with_where(|d| d.value("series") != &Value::from("skip"))
        .with_is_null(|d| d.number("value").is_none());
    let added = cube
        .load(
            data,
            [
                row("A", "X", 1.0),
                row("skip", "X", 2.0),
                Row::new().with("series", "B").with("category", "X"),
            ],
            &args,
        )
        .unwrap();
    assert_eq!(added.len(), 2);
    assert!(!cube.datum(added[0]).unwrap().is_null());
    assert!(cube.datum(added[1]).unwrap().is_null());

    assert!(!cube.set_selected(added[1], true).unwrap());
    assert!(cube.set_selected(added[0], true).unwrap());
    assert_eq!(cube.data(data).unwrap().selected_count(), 1);
    assert_eq!(cube.data(data).unwrap().visible_count(), 1);
}

#[test]
fn missing_dimensions_resolve_to_the_placeholder_null() {
    let mut cube = cube();
    let data = cube.create_owner();
    let added = cube
        .load(data, [Row::new().with("series", "A")], &LoadArgs::default())
        .unwrap();
    let view = cube.datum_view(added[0]).unwrap();
    let category = view.atom("category").unwrap();
    assert!(category.is_virtual_null());
    assert_eq!(view.value("value"), &Value::Null);
    assert_eq!(cube.atom_count(data, "category").unwrap(), 0);
}

#[test]
fn loading_rejects_bad_targets_and_rows() {
    let mut cube = cube();
    let data = cube.create_owner();
    assert_eq!(
        cube.set_datums(data, None, false, &LoadArgs::default()),
        Err(CubeError::ArgumentRequired("rows".to_string()))
    );
    assert!(matches!(
        cube.load(data, [Row::new().with("color", "red")], &LoadArgs::default()),
        Err(CubeError::ArgumentInvalid { .. })
    ));

    cube.load(data, [row("A", "X", 1.0)], &LoadArgs::default())
        .unwrap();
    let view = cube
        .where_view(data, None, &QueryArgs::default())
        .unwrap();
    assert!(matches!(
        cube.add(view, [row("B", "X", 1.0)], &LoadArgs::default()),
        Err(CubeError::OperationInvalid(_))
    ));

    let other = cube.create_owner();
    let foreign = cube.intern(other, "series", "A", false).unwrap();
    assert!(matches!(
        cube.add(data, [Row::new().with("series", foreign)], &LoadArgs::default()),
        Err(CubeError::OperationInvalid(_))
    ));

    cube.dispose(other).unwrap();
    assert_eq!(
        cube.load(other, [row("A", "X", 1.0)], &LoadArgs::default()),
        Err(CubeError::DataDisposed(other))
    );
}

#[test]
fn additive_loads_reach_linked_views() {
    let mut cube = cube();
    let data = cube.create_owner();
    cube.load(data, [row("A", "X", 1.0)], &LoadArgs::default())
        .unwrap();
    let positive = cube
        .where_view(
            data,
            None,
            &QueryArgs::new().with_where(Some("positive"), |d| {
                d.number("value").is_some_and(|v| v > 0.0)
            }),
        )
        .unwrap();

    cube.add(
        data,
        [row("B", "X", -1.0), row("C", "Y", 2.0)],
        &LoadArgs::default(),
    )
    .unwrap();
    assert_eq!(series_of(&cube, positive), vec!["A", "C"]);
    assert_eq!(
        cube.dimension_atoms(positive, "category", None)
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn sliding_window_evicts_oldest_datums() {
    let mut cube = cube();
    let data = cube.create_owner();
    let keep_last_two: SlidingWindow = Arc::new(|_: &Cube, datums: &[DatumId]| {
        datums.iter().rev().skip(2).copied().collect()
    });
    cube.set_sliding_window(data, Some(keep_last_two)).unwrap();

    cube.add(data, [row("A", "X", 1.0), row("B", "X", 2.0)], &LoadArgs::default())
        .unwrap();
    let added = cube
        .add(data, [row("C", "X", 3.0)], &LoadArgs::default())
        .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(series_of(&cube, data), vec!["B", "C"]);

    cube.collect_atoms(data).unwrap();
    assert_eq!(cube.read(data, "series", "A").unwrap(), None);
}

#[test]
fn sliding_window_with_dependents_rejects_additive_loads() {
    let mut cube = cube();
    let data = cube.create_owner();
    cube.load(data, [row("A", "X", 1.0)], &LoadArgs::default())
        .unwrap();
    cube.where_view(data, None, &QueryArgs::default()).unwrap();
    let keep_all: SlidingWindow = Arc::new(|_: &Cube, _: &[DatumId]| Vec::new());
    cube.set_sliding_window(data, Some(keep_all)).unwrap();

    assert!(matches!(
        cube.add(data, [row("B", "X", 1.0)], &LoadArgs::default()),
        Err(CubeError::OperationInvalid(_))
    ));

    cube.dispose_dependents(data).unwrap();
    assert_eq!(
        cube.add(data, [row("B", "X", 1.0)], &LoadArgs::default())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn replace_load_disposes_dependents() {
    let mut cube = cube();
    let data = cube.create_owner();
    cube.load(data, [row("A", "X", 1.0)], &LoadArgs::default())
        .unwrap();
    let view = cube.where_view(data, None, &QueryArgs::default()).unwrap();
    cube.load(data, [row("B", "X", 1.0)], &LoadArgs::default())
        .unwrap();
    assert!(cube.is_disposed(view));
    assert!(cube.data(data).unwrap().link_children().is_empty());
}

#[test]
fn rejected_replace_load_leaves_the_node_untouched() {
    let mut cube = cube();
    let data = cube.create_owner();
    let ids = cube
        .load(
            data,
            [row("A", "X", 1.0), row("B", "Y", 2.0)],
            &LoadArgs::default(),
        )
        .unwrap();
    let view = cube.where_view(data, None, &QueryArgs::default()).unwrap();
    let stats = cube.stats();

    let result = cube.load(
        data,
        [row("C", "Z", 3.0), Row::new().with("color", "red")],
        &LoadArgs::default(),
    );
    assert!(matches!(result, Err(CubeError::ArgumentInvalid { .. })));

    assert_eq!(cube.data(data).unwrap().datums(), ids.as_slice());
    assert!(!cube.is_disposed(view));
    assert_eq!(series_of(&cube, view), vec!["A", "B"]);
    assert_eq!(cube.read(data, "series", "C").unwrap(), None);
    assert_eq!(cube.atom_count(data, "series").unwrap(), 2);
    assert_eq!(cube.stats(), stats);
}

#[test]
fn keys_containing_the_separator_stay_distinct() {
    let mut cube = cube();
    let data = cube.create_owner();
    let ids = cube
        .load(
            data,
            [
                row("A\u{1f}B", "C", 1.0),
                row("A", "B\u{1f}C", 1.0),
                row("A\\", "C", 1.0),
                row("A", "\\C", 1.0),
            ],
            &LoadArgs::default(),
        )
        .unwrap();
    assert_eq!(ids.len(), 4);
    let keys: std::collections::HashSet<&str> =
        ids.iter().map(|id| cube.datum(*id).unwrap().key()).collect();
    assert_eq!(keys.len(), 4);
}

#[test]
fn removing_datums_updates_every_dependent() {
    let mut cube = cube();
    let data = cube.create_owner();
    let ids = cube
        .load(
            data,
            [row("A", "X", 1.0), row("B", "Y", 2.0)],
            &LoadArgs::default(),
        )
        .unwrap();
    let view = cube.where_view(data, None, &QueryArgs::default()).unwrap();
    assert_eq!(cube.remove_datums(data, [ids[0]]).unwrap(), 1);
    assert_eq!(series_of(&cube, data), vec!["B"]);
    assert_eq!(series_of(&cube, view), vec!["B"]);
    assert_eq!(
        cube.dimension_atoms(view, "category", None).unwrap(),
        vec![cube.read(data, "category", "Y").unwrap().unwrap()]
    );
}

#[cfg(not(target_arch = "wasm32"))]
mod interning {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn equal_keys_share_one_atom(values in prop::collection::vec("[a-c]{0,2}", 1..20)) {
            let mut cube = cube();
            let data = cube.create_owner();
            let mut seen: Vec<(String, formula_cube::AtomId)> = Vec::new();
            for value in &values {
                let atom = cube.intern(data, "series", value.as_str(), false).unwrap();
                if let Some((_, earlier)) = seen.iter().find(|(v, _)| v == value) {
                    prop_assert_eq!(*earlier, atom);
                } else {
                    prop_assert!(seen.iter().all(|(_, other)| *other != atom));
                    seen.push((value.clone(), atom));
                }
            }
            prop_assert_eq!(cube.atom_count(data, "series").unwrap(), seen.len());

            if values.iter().any(String::is_empty) {
                let null = cube.intern(data, "series", Value::Null, false).unwrap();
                prop_assert_eq!(cube.null_atom(data, "series").unwrap(), Some(null));
            }
        }
    }
}
