use std::sync::OnceLock;

use formula_compiler::{
    AccessorError, CompileOptions, Engine, EngineCompiler, ErrorKind, EvalError, GridResolver,
    ModelResolver, Record,
};
use formula_model::{
    AccessorPath, CellContent, ComputationModel, FormulaSource, NumericType, Orientation,
    OutputInterface, ReferenceDialect, RoundingMode, SectionId, Value, ValueType,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn backends() -> [NumericType; 3] {
    [
        NumericType::Double,
        NumericType::scaled_long(4),
        NumericType::big_decimal(8, RoundingMode::HalfUp),
    ]
}

fn input(model: &mut ComputationModel, section: SectionId, name: &str, field: &str) {
    let id = model.add_cell(section, name, CellContent::Empty).unwrap();
    model.bind_input(id, AccessorPath::field(field));
}

fn output(model: &mut ComputationModel, section: SectionId, name: &str, text: &str, out: &str) {
    let id = model
        .add_formula(section, name, FormulaSource::new(text, ReferenceDialect::A1))
        .unwrap();
    model.bind_output(id, out).unwrap();
}

fn compile(
    mut model: ComputationModel,
    interface: &OutputInterface,
    options: CompileOptions,
) -> Engine {
    let resolver = GridResolver::from_model(&model);
    ModelResolver::new(&resolver).resolve(&mut model).unwrap();
    EngineCompiler::new(options).compile(model, interface).unwrap()
}

fn product_model() -> ComputationModel {
    let mut model = ComputationModel::new("product");
    let root = model.root();
    input(&mut model, root, "A1", "a");
    input(&mut model, root, "B1", "b");
    output(&mut model, root, "C1", "A1*B1", "result");
    model
}

#[test]
fn every_backend_multiplies_text_inputs() {
    let interface = OutputInterface::new().output("result", ValueType::Number);
    for numeric_type in backends() {
        let engine = compile(product_model(), &interface, CompileOptions::new(numeric_type));
        assert_eq!(engine.numeric_type(), numeric_type);
        let computation = engine.new_computation(Record::new().with("a", "4").with("b", "40"));
        assert_eq!(
            computation.value("result").unwrap(),
            Value::number(160),
            "{numeric_type}"
        );
    }
}

fn ratio_model() -> (ComputationModel, OutputInterface) {
    let mut model = ComputationModel::new("ratios");
    let root = model.root();
    input(&mut model, root, "A1", "x");
    output(&mut model, root, "B1", "A1/7", "seventh");
    output(&mut model, root, "C1", "ROUND(A1/4, 1)", "quarter");
    output(&mut model, root, "D1", "A1/4", "whole");
    output(&mut model, root, "E1", "A1/4", "label");
    output(&mut model, root, "F1", "IF(A1>10, \"big\", \"small\")", "size");
    let interface = OutputInterface::new()
        .output("seventh", ValueType::Any)
        .output("quarter", ValueType::Number)
        .output("whole", ValueType::Integer)
        .output("label", ValueType::Text)
        .output("size", ValueType::Any);
    (model, interface)
}

#[test]
fn saved_engines_reproduce_their_outputs() {
    for numeric_type in backends() {
        let (model, interface) = ratio_model();
        let engine = compile(model, &interface, CompileOptions::new(numeric_type));
        let mut bytes = Vec::new();
        engine.save_to(&mut bytes).unwrap();
        let loaded = Engine::load_from(bytes.as_slice()).unwrap();
        assert_eq!(loaded.program(), engine.program());

        for x in [-3, 0, 10, 13, 1_000_001] {
            let original = engine.new_computation(Record::new().with("x", x)).values().unwrap();
            let reloaded = loaded.new_computation(Record::new().with("x", x)).values().unwrap();
            assert_eq!(original, reloaded, "{numeric_type} x={x}");
        }
    }
}

#[test]
fn outputs_are_converted_to_their_declared_type() {
    let (model, interface) = ratio_model();
    let engine = compile(model, &interface, CompileOptions::new(NumericType::scaled_long(4)));
    let computation = engine.new_computation(Record::new().with("x", 10));
    assert_eq!(computation.value("whole").unwrap(), Value::number(2));
    assert_eq!(computation.value("label").unwrap(), Value::text("2.5"));
    assert_eq!(computation.value("seventh").unwrap().to_string(), "1.4286");
    assert_eq!(computation.value("size").unwrap(), Value::text("small"));
    assert_eq!(
        computation.output_names(),
        vec!["seventh", "quarter", "whole", "label", "size"]
    );
}

#[test]
fn evaluation_failures() {
    let (model, interface) = ratio_model();
    let engine = compile(model, &interface, CompileOptions::default());

    let missing = engine.new_computation(Record::new());
    let Err(EvalError::Input(err)) = missing.value("seventh") else {
        panic!("expected an input error");
    };
    assert_eq!(
        err.downcast_ref::<AccessorError>(),
        Some(&AccessorError::Missing("x".to_string()))
    );

    let computation = engine.new_computation(Record::new().with("x", "ten"));
    let err = computation.value("seventh").unwrap_err();
    assert_eq!(err.formula_error(), Some(ErrorKind::Value));

    assert!(matches!(
        computation.value("nothing"),
        Err(EvalError::NameNotFound { name }) if name == "nothing"
    ));
}

fn invoice_model() -> (ComputationModel, OutputInterface) {
    let mut model = ComputationModel::new("invoice");
    let root = model.root();
    let lines = model
        .add_section(root, "lines", Orientation::Vertical, AccessorPath::field("lines"))
        .unwrap();
    model.bind_section_output(lines, "lines");
    input(&mut model, lines, "A2", "price");
    input(&mut model, lines, "B2", "qty");
    output(&mut model, lines, "C2", "A2*B2*(1-$B$1)", "amount");
    input(&mut model, root, "B1", "discount");
    output(&mut model, root, "D1", "SUM(C2:C3)", "total");
    output(&mut model, root, "E1", "COUNT(C2:C3)", "count");
    let interface = OutputInterface::new()
        .output("total", ValueType::Number)
        .output("count", ValueType::Integer)
        .section(
            "lines",
            OutputInterface::new().output("amount", ValueType::Number),
        );
    (model, interface)
}

fn invoice() -> Record {
    Record::new().with("discount", "0.1").with_rows(
        "lines",
        [(10, 2), (5, 4), (1, 0)].map(|(price, qty)| Record::new().with("price", price).with("qty", qty)),
    )
}

#[test]
fn repeating_sections_yield_row_computations() {
    let (model, interface) = invoice_model();
    let engine = compile(model, &interface, CompileOptions::new(NumericType::scaled_long(2)));
    let computation = engine.new_computation(invoice());
    assert_eq!(computation.value("total").unwrap(), Value::number(36));
    assert_eq!(computation.value("count").unwrap(), Value::number(3));

    let rows = computation.rows("lines").unwrap();
    let amounts: Vec<Value> = rows.iter().map(|r| r.value("amount").unwrap()).collect();
    assert_eq!(amounts, vec![Value::number(18), Value::number(18), Value::number(0)]);

    let empty = engine.new_computation(Record::new().with("discount", 0).with("lines", Value::Null));
    assert_eq!(empty.value("total").unwrap(), Value::number(0));
    assert!(empty.rows("lines").unwrap().is_empty());
}

#[test]
fn full_caching_memoizes_per_computation() {
    let (model, interface) = invoice_model();
    let engine = compile(
        model,
        &interface,
        CompileOptions::default().with_full_caching(true),
    );
    let computation = engine.new_computation(invoice());
    assert_eq!(computation.cached_count(), 0);
    let total = computation.value("total").unwrap();
    let cached = computation.cached_count();
    assert!(cached > 0);
    assert_eq!(computation.value("total").unwrap(), total);

    let rows = computation.rows("lines").unwrap();
    assert_eq!(rows[1].value("amount").unwrap(), Value::number(18));
    assert_eq!(rows[1].cached_count(), computation.cached_count());

    let fresh = engine.new_computation(invoice());
    assert_eq!(fresh.cached_count(), 0);

    let (model, interface) = invoice_model();
    let uncached = compile(model, &interface, CompileOptions::default());
    let computation = uncached.new_computation(invoice());
    assert_eq!(computation.value("total").unwrap(), total);
    assert_eq!(computation.cached_count(), 0);
}

#[test]
fn unoptimized_engines_agree_with_optimized_ones() {
    let (model, interface) = invoice_model();
    let plain = compile(model, &interface, CompileOptions::default().with_optimize(false));
    let (model, interface) = invoice_model();
    let optimized = compile(model, &interface, CompileOptions::default());
    assert_eq!(
        plain.new_computation(invoice()).values().unwrap(),
        optimized.new_computation(invoice()).values().unwrap()
    );
}

/// | Region | Amount |   | Region |
/// | north  | x      |   | north  |
/// | south  | 20     |
/// | north  | n/a    |
fn ledger_model() -> (ComputationModel, OutputInterface) {
    let mut model = ComputationModel::new("ledger");
    let root = model.root();
    let labels = [
        ("A1", "Region"),
        ("B1", "Amount"),
        ("A2", "north"),
        ("A3", "south"),
        ("A4", "north"),
        ("B4", "n/a"),
        ("D1", "Region"),
        ("D2", "north"),
    ];
    for (name, label) in labels {
        model.add_constant(root, name, label).unwrap();
    }
    model.add_constant(root, "B3", 20).unwrap();
    input(&mut model, root, "B2", "x");
    output(&mut model, root, "F1", "SUM(B1:B4)", "total");
    output(&mut model, root, "F2", "AVERAGE(B1:B4)", "mean");
    output(&mut model, root, "F3", "MIN(B1:B4)", "low");
    output(&mut model, root, "F4", "MAX(B1:B4)", "high");
    output(&mut model, root, "F5", "COUNT(B1:B4)", "count");
    output(&mut model, root, "F6", "DSUM(A1:B4, \"Amount\", D1:D2)", "north");
    let interface = OutputInterface::new()
        .output("total", ValueType::Number)
        .output("mean", ValueType::Number)
        .output("low", ValueType::Number)
        .output("high", ValueType::Number)
        .output("count", ValueType::Integer)
        .output("north", ValueType::Number);
    (model, interface)
}

#[test]
fn aggregates_skip_labels_inside_ranges() {
    for numeric_type in backends() {
        for optimize in [true, false] {
            let (model, interface) = ledger_model();
            let options = CompileOptions::new(numeric_type).with_optimize(optimize);
            let engine = compile(model, &interface, options);
            let computation = engine.new_computation(Record::new().with("x", 6));
            let values: Vec<Value> = ["total", "mean", "low", "high", "count", "north"]
                .iter()
                .map(|name| computation.value(name).unwrap())
                .collect();
            assert_eq!(
                values,
                [26, 13, 6, 20, 2, 6].map(Value::number).to_vec(),
                "{numeric_type} optimize={optimize}"
            );
        }
    }
}

fn agreement_engines() -> &'static Vec<Engine> {
    static ENGINES: OnceLock<Vec<Engine>> = OnceLock::new();
    ENGINES.get_or_init(|| {
        backends()
            .into_iter()
            .map(|numeric_type| {
                let mut model = ComputationModel::new("mix");
                let root = model.root();
                input(&mut model, root, "A1", "a");
                input(&mut model, root, "B1", "b");
                input(&mut model, root, "C1", "c");
                output(&mut model, root, "D1", "SUM(A1,B1,C1)*2-MAX(A1,B1)+A1*C1", "mix");
                let interface = OutputInterface::new().output("mix", ValueType::Any);
                compile(model, &interface, CompileOptions::new(numeric_type))
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn backends_agree_on_integer_arithmetic(
        a in -10_000i64..10_000,
        b in -10_000i64..10_000,
        c in -100i64..100,
    ) {
        let expected = (a + b + c) * 2 - a.max(b) + a * c;
        for engine in agreement_engines() {
            let input = Record::new().with("a", a).with("b", b.to_string()).with("c", c);
            let value = engine.new_computation(input).value("mix").unwrap();
            prop_assert_eq!(value, Value::number(expected));
        }
    }
}
