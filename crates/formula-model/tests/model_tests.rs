use formula_model::{
    AccessorPath, AccessorStep, CellContent, ComputationModel, ExpressionNode, FoldDef, ModelError,
    NumericType, Operator, Orientation, OutputInterface, RoundingMode, Value, ValueType,
};
use pretty_assertions::assert_eq;

fn banded() -> ComputationModel {
    let mut model = ComputationModel::new("order");
    let root = model.root();
    let lines = model
        .add_section(root, "lines", Orientation::Vertical, AccessorPath::field("lines"))
        .unwrap();
    model
        .add_section(lines, "taxes", Orientation::Horizontal, AccessorPath::field("taxes"))
        .unwrap();
    model.add_constant(root, "RATE", 2).unwrap();
    model.add_cell(lines, "PRICE", CellContent::Empty).unwrap();
    model
}

#[test]
fn sections_nest_and_names_are_unique() {
    let mut model = banded();
    let root = model.root();
    let lines = model.find_section("lines").unwrap();
    let taxes = model.find_section("taxes").unwrap();
    assert_eq!(model.section(taxes).parent(), Some(lines));
    assert_eq!(model.section(lines).sections(), &[taxes]);
    assert_eq!(model.section(taxes).orientation(), Orientation::Horizontal);
    assert_eq!(model.section(lines).input(), Some(&AccessorPath::field("lines")));
    assert!(model.is_ancestor(root, taxes));
    assert!(!model.is_ancestor(taxes, lines));

    let err = model
        .add_section(root, "taxes", Orientation::Vertical, AccessorPath::field("t"))
        .unwrap_err();
    assert_eq!(err, ModelError::DuplicateDefinition { name: "taxes".to_string() });
    assert_eq!(
        model.cell_named("QTY").unwrap_err(),
        ModelError::NameNotFound { name: "QTY".to_string() }
    );
}

#[test]
fn output_names_are_unique_per_section() {
    let mut model = banded();
    let root = model.root();
    let lines = model.find_section("lines").unwrap();
    let rate = model.cell_named("RATE").unwrap();
    let price = model.cell_named("PRICE").unwrap();
    let total = model.add_constant(root, "TOTAL", 0).unwrap();

    model.bind_output(rate, "value").unwrap();
    model.bind_output(price, "value").unwrap();
    assert!(matches!(
        model.bind_output(total, "value"),
        Err(ModelError::DuplicateDefinition { .. })
    ));
    // Rebinding a cell to its own name is fine.
    model.bind_output(rate, "value").unwrap();

    model.bind_section_output(lines, "lines");
    assert_eq!(model.section(lines).output(), Some("lines"));
    assert_eq!(model.cell(price).output(), Some("value"));
}

#[test]
fn describe_uses_cell_names() {
    let model = banded();
    let lines = model.find_section("lines").unwrap();
    let rate = model.cell_named("RATE").unwrap();
    let price = model.cell_named("PRICE").unwrap();
    let line_total = ExpressionNode::binary(
        Operator::Mul,
        ExpressionNode::cell(price),
        ExpressionNode::parent_section(lines, ExpressionNode::cell(rate)),
    );
    assert_eq!(model.describe(&line_total), "(PRICE * PARENT(RATE))");

    let sum = ExpressionNode::fold(
        FoldDef::new("acc", "x").commutative(),
        ExpressionNode::constant(0),
        ExpressionNode::binary(Operator::Add, ExpressionNode::var("acc"), ExpressionNode::var("x")),
        vec![ExpressionNode::sub_section(lines, vec![ExpressionNode::cell(price)])],
    );
    assert_eq!(
        model.describe(&sum),
        "FOLD(acc = 0; x: (acc + x); SECTION1(PRICE))"
    );
}

#[test]
fn reference_bookkeeping() {
    let mut model = banded();
    let rate = model.cell_named("RATE").unwrap();
    let cell = model.cell_mut(rate);
    assert_eq!(cell.add_reference(), 1);
    assert_eq!(cell.add_reference(), 2);
    cell.mark_sub_band_accessed();
    assert!(cell.is_sub_band_accessed());
    cell.reset_references();
    assert_eq!(cell.reference_count(), 0);
    assert!(!cell.is_sub_band_accessed());
}

#[test]
fn interfaces_and_configuration_serialize() {
    let interface = OutputInterface::new()
        .output("total", ValueType::Number)
        .section("lines", OutputInterface::new().output("amount", ValueType::Integer));
    let json = serde_json::to_string(&interface).unwrap();
    let back: OutputInterface = serde_json::from_str(&json).unwrap();
    assert_eq!(back, interface);
    assert_eq!(
        back.find_section("lines").and_then(|s| s.find_output("amount")).map(|o| o.value_type),
        Some(ValueType::Integer)
    );

    for numeric_type in [
        NumericType::Double,
        NumericType::scaled_long(4),
        NumericType::big_decimal(8, RoundingMode::HalfEven),
    ] {
        let json = serde_json::to_string(&numeric_type).unwrap();
        assert_eq!(serde_json::from_str::<NumericType>(&json).unwrap(), numeric_type);
    }
    assert_eq!(NumericType::scaled_long(4).to_string(), "scaled-long(4)");
}

#[test]
fn accessor_paths_print_their_steps() {
    let path = AccessorPath::new(vec![
        AccessorStep::new("customer"),
        AccessorStep::with_args("rate", vec![Value::text("EUR"), Value::number(2)]),
    ]);
    assert_eq!(path.to_string(), "customer.rate(\"EUR\", 2)");
    let (init, last) = path.split_last().unwrap();
    assert_eq!(init, &[AccessorStep::new("customer")]);
    assert_eq!(last.name, "rate");
    assert!(AccessorPath::new(Vec::new()).split_last().is_none());
}
