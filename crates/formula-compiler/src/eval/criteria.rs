use formula_model::{BigDecimal, Operator, Value};

/// A `SUMIF`/database criterion: a comparison against a fixed operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    pub op: Operator,
    pub operand: Value,
}

/// Reads a criteria cell value. Text may start with `=`, `<>`, `<=`, `>=`, `<` or `>`; the rest
/// is compared as a number when it parses as one. Empty criteria impose no condition (`None`).
pub fn parse_criterion(value: &Value) -> Option<Criterion> {
    let text = match value {
        Value::Null => return None,
        Value::Number(_) => {
            return Some(Criterion {
                op: Operator::Eq,
                operand: value.clone(),
            })
        }
        Value::Text(text) => text.as_str(),
    };
    if text.is_empty() {
        return None;
    }
    let (op, rest) = [
        ("<>", Operator::Ne),
        ("<=", Operator::Le),
        (">=", Operator::Ge),
        ("<", Operator::Lt),
        (">", Operator::Gt),
        ("=", Operator::Eq),
    ]
    .into_iter()
    .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (op, rest)))
    .unwrap_or((Operator::Eq, text));
    let operand = match rest.trim().parse::<BigDecimal>() {
        Ok(n) if !rest.trim().is_empty() => Value::Number(n),
        _ => Value::text(rest),
    };
    Some(Criterion { op, operand })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_prefixes() {
        let c = parse_criterion(&Value::text(">=10")).unwrap();
        assert_eq!(c.op, Operator::Ge);
        assert_eq!(c.operand, Value::number(10));
        let c = parse_criterion(&Value::text("<>north")).unwrap();
        assert_eq!((c.op, c.operand), (Operator::Ne, Value::text("north")));
        let c = parse_criterion(&Value::text("north")).unwrap();
        assert_eq!((c.op, c.operand), (Operator::Eq, Value::text("north")));
        assert_eq!(parse_criterion(&Value::Null), None);
        assert_eq!(parse_criterion(&Value::text("")), None);
    }
}
