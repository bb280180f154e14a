use proptest::prelude::*;
use sheetfold_common::column_to_letters;
use sheetfold_parse::parse;
use sheetfold_pattern::{
    CellAddress, CellReference, Compatibility, Distance, InMemorySource, Mismatch, ModelRole,
    check_compatible, check_formulas, extract_variability,
};

fn addr(sheet: &str, a1: &str) -> CellAddress {
    CellAddress::from_a1(sheet, a1).unwrap()
}

fn problem_sheet() -> InMemorySource {
    InMemorySource::new()
        .with_formula_a1("Problem", "K2", "=IF(C2<E2,E2-C2,0)")
        .with_formula_a1("Problem", "K3", "=IF(C3<E3,E3-C3,0)")
        .with_formula_a1("Problem", "L2", "=IF(C2<E2,(E2-C2)*loc!$B$2,0)")
        .with_formula_a1("Problem", "L6", "=IF(C6<E6,(E6-C6)*loc!$B$3,0)")
        .with_formula_a1("inventory", "M2", "=SUM($H$2+$I$2)")
        .with_formula_a1("inventory", "M3", "=SUM($H$2+$I$2)")
        .with_value_a1("inventory", "N2", sheetfold_common::LiteralValue::Number(1.0))
        .with_default_formula_role(ModelRole::Constraint)
}

#[test]
fn dragged_if_formula_is_compatible() {
    let src = problem_sheet();
    let result = check_compatible(&addr("Problem", "K2"), &addr("Problem", "K3"), &src).unwrap();
    let (tree, refs) = result.variability().unwrap();
    assert_eq!(tree.leaf_count(), 4);
    assert_eq!(
        refs,
        vec![
            CellReference::from_a1("Problem", "C2").unwrap(),
            CellReference::from_a1("Problem", "E2").unwrap(),
        ]
    );
    let per_ref = |a1: &str| tree.leaves().iter().filter(|(_, r)| r.a1() == a1).count();
    assert_eq!(per_ref("C2"), 2);
    assert_eq!(per_ref("E2"), 2);
}

#[test]
fn changed_anchored_reference_breaks_compatibility() {
    let src = problem_sheet();
    let result = check_compatible(&addr("Problem", "L2"), &addr("Problem", "L6"), &src).unwrap();
    assert!(matches!(
        result,
        Compatibility::Incompatible(Mismatch::Reference { .. })
    ));
}

#[test]
fn fully_anchored_formula_is_a_constant_pattern() {
    let src = problem_sheet();
    let result =
        check_compatible(&addr("inventory", "M2"), &addr("inventory", "M3"), &src).unwrap();
    let bindings = result.bindings().unwrap();
    assert!(bindings.is_empty());
    let (tree, refs) = extract_variability(bindings);
    assert!(tree.is_empty());
    assert!(refs.is_empty());
}

#[test]
fn missing_formula_is_not_an_error() {
    let src = problem_sheet();
    let result =
        check_compatible(&addr("inventory", "M2"), &addr("inventory", "N2"), &src).unwrap();
    assert_eq!(result, Compatibility::Incompatible(Mismatch::NoFormula));
    let result =
        check_compatible(&addr("inventory", "M2"), &addr("inventory", "Z99"), &src).unwrap();
    assert_eq!(result.mismatch(), Some(&Mismatch::NoFormula));
}

#[test]
fn reordered_operands_are_incompatible() {
    let result = check_formulas(
        "=A1+B1",
        &addr("S", "C1"),
        "=B2+A2",
        &addr("S", "C2"),
    )
    .unwrap();
    assert!(!result.is_compatible());
}

#[test]
fn sheet_prefixed_range_shifts_both_endpoints() {
    let result = check_formulas(
        "=SUM(loc!B2:C2)",
        &addr("S", "D2"),
        "=SUM(loc!B3:C3)",
        &addr("S", "D3"),
    )
    .unwrap();
    let (_, refs) = result.variability().unwrap();
    assert_eq!(refs.iter().map(ToString::to_string).collect::<Vec<_>>(), vec!["loc!B2", "loc!C2"]);
}

/// (col, row, col_fixed, row_fixed) of one reference occurrence.
type RefSpec = (u32, u32, bool, bool);

fn render(specs: &[RefSpec], distance: Distance) -> String {
    let ops = ["+", "*", "-"];
    let mut out = String::from("=SUM(");
    for (i, &(col, row, cf, rf)) in specs.iter().enumerate() {
        if i > 0 {
            out.push_str(ops[i % ops.len()]);
        }
        let r = CellReference::new("S", row, col, rf, cf)
            .shifted(distance)
            .unwrap();
        out.push_str(&r.a1());
    }
    out.push(')');
    out
}

fn ref_spec() -> impl Strategy<Value = RefSpec> {
    (1u32..30, 1u32..30, any::<bool>(), any::<bool>())
}

fn drag() -> impl Strategy<Value = Distance> {
    (0i64..6, 0i64..4).prop_map(|(r, c)| {
        if r == 0 && c == 0 {
            Distance::new(1, 0)
        } else {
            Distance::new(r, c)
        }
    })
}

proptest! {
    #[test]
    fn drag_copies_are_compatible_and_offset_exact(
        specs in proptest::collection::vec(ref_spec(), 1..5),
        distance in drag(),
    ) {
        let origin = CellAddress::new("S", 40, 40);
        let candidate = CellAddress::new(
            "S",
            (40 + distance.d_row) as u32,
            (40 + distance.d_col) as u32,
        );
        let origin_text = render(&specs, Distance::ZERO);
        let candidate_text = render(&specs, distance);

        let result = check_formulas(&origin_text, &origin, &candidate_text, &candidate).unwrap();
        let again = check_formulas(&origin_text, &origin, &candidate_text, &candidate).unwrap();
        prop_assert_eq!(&result, &again);

        let bindings = result.bindings().expect("drag copy must be compatible");
        let variable = specs.iter().filter(|(_, _, cf, rf)| !(*cf && *rf)).count();
        prop_assert_eq!(bindings.len(), variable);

        let tree = parse(&candidate_text).unwrap();
        for (path, origin_ref) in bindings.iter() {
            let node = tree.node_at(path).unwrap();
            prop_assert!(node.is_cell_ref());
            let moved = CellReference::from_a1("S", node.text()).unwrap();
            prop_assert_eq!(Some(moved), origin_ref.shifted(distance));
        }
    }

    #[test]
    fn fully_anchored_reference_must_not_move(
        specs in proptest::collection::vec(ref_spec(), 1..5),
        pick in any::<prop::sample::Index>(),
        distance in drag(),
    ) {
        let mut specs = specs;
        let i = pick.index(specs.len());
        specs[i].2 = true;
        specs[i].3 = true;

        let origin = CellAddress::new("S", 40, 40);
        let candidate = CellAddress::new(
            "S",
            (40 + distance.d_row) as u32,
            (40 + distance.d_col) as u32,
        );
        let origin_text = render(&specs, Distance::ZERO);
        let mut moved = specs.clone();
        moved[i].1 += 1;
        let candidate_text = render(&moved, distance);

        let result = check_formulas(&origin_text, &origin, &candidate_text, &candidate).unwrap();
        prop_assert!(matches!(result, Compatibility::Incompatible(Mismatch::Reference { .. })), "expected Reference mismatch");
    }
}

#[test]
fn rendered_fixture_matches_a1_conventions() {
    let text = render(&[(3, 2, true, false), (28, 5, false, true)], Distance::new(1, 1));
    assert_eq!(text, format!("=SUM($C3*{}$5)", column_to_letters(29)));
}
