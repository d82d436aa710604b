//! DSL compiler (§4.F): turns the raw YAML grammar into a `CompiledExpr`
//! once, at Play-load time. Validates every reference against the Play's
//! feature/structure/setup registry, enforces window caps, rejects `==`/`!=`
//! on float-typed references, and computes the per-rule warmup requirement.

use std::collections::{HashMap, HashSet};

use serde_yaml::Value;

use super::ast::{ArithOp, CompiledExpr, CondOp, CrossOp, Operand, WindowAnchor, WindowExpr};
use crate::error::{EngineResult, PlayError};
use crate::feed::TimeframeRole;
use crate::snapshot::{OhlcvField, Ref};
use crate::time::Timeframe;

const MAX_WINDOW_BARS: u32 = 500;
const MAX_WINDOW_DURATION_MIN: u32 = 1440;

/// Everything the compiler needs to resolve and validate paths for one
/// Play: which role a feature/structure lives on, each feature's own
/// warmup, and the tf-role lookup used by `close_{tf}` paths.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub feature_role: HashMap<String, TimeframeRole>,
    pub feature_warmup: HashMap<String, u32>,
    pub structure_role: HashMap<String, TimeframeRole>,
    pub setup_names: HashSet<String>,
    pub role_tf: HashMap<TimeframeRole, Timeframe>,
}

impl Registry {
    fn role_for_tf_suffix(&self, tf_str: &str) -> Option<TimeframeRole> {
        let tf: Timeframe = tf_str.parse().ok()?;
        self.role_tf.iter().find(|(_, t)| **t == tf).map(|(r, _)| *r)
    }
}

fn split_bracket(segment: &str) -> (&str, Option<&str>) {
    if let Some(open) = segment.find('[') {
        if segment.ends_with(']') {
            return (&segment[..open], Some(&segment[open + 1..segment.len() - 1]));
        }
    }
    (segment, None)
}

fn ohlcv_field(name: &str) -> Option<OhlcvField> {
    Some(match name {
        "open" => OhlcvField::Open,
        "high" => OhlcvField::High,
        "low" => OhlcvField::Low,
        "close" => OhlcvField::Close,
        "volume" => OhlcvField::Volume,
        _ => return None,
    })
}

/// Resolves a dotted/bracketed DSL path into a compiled `Ref` (§4.E table).
pub fn parse_path(path: &str, registry: &Registry) -> EngineResult<Ref> {
    let body = path.strip_prefix("structure.").unwrap_or(path);
    let segments: Vec<&str> = body.split('.').collect();

    match segments.as_slice() {
        [single] => {
            let (name, bracket) = split_bracket(single);
            let offset: i64 = bracket.and_then(|b| b.parse().ok()).unwrap_or(0);
            if let Some(field) = ohlcv_field(name) {
                return Ok(Ref::Ohlcv(field, TimeframeRole::Exec, offset));
            }
            if let Some(tf_str) = name.strip_prefix("close_") {
                let role = registry
                    .role_for_tf_suffix(tf_str)
                    .ok_or_else(|| PlayError::UnresolvedReference { path: path.to_string() })?;
                return Ok(Ref::Ohlcv(OhlcvField::Close, role, offset));
            }
            if let Some(role) = registry.feature_role.get(name) {
                return Ok(Ref::Feature(*role, name.to_string(), offset));
            }
            Err(PlayError::UnresolvedReference { path: path.to_string() }.into())
        }
        [first, second] if *first == "price" => match *second {
            "mark" => Ok(Ref::PriceMark),
            "last" => Ok(Ref::PriceLast),
            _ => Err(PlayError::UnresolvedReference { path: path.to_string() }.into()),
        },
        [id, output] if registry.feature_role.contains_key(*id) => {
            let role = registry.feature_role[*id];
            let (out_name, bracket) = split_bracket(output);
            let _offset: i64 = bracket.and_then(|b| b.parse().ok()).unwrap_or(0);
            Ok(Ref::Feature(role, format!("{id}.{out_name}"), _offset))
        }
        [key, field] if registry.structure_role.contains_key(*key) => {
            let role = registry.structure_role[*key];
            Ok(Ref::Structure(role, key.to_string(), field.to_string()))
        }
        [key, zone_seg, field] if registry.structure_role.contains_key(*key) && zone_seg.starts_with("zone") => {
            let role = registry.structure_role[*key];
            let (_, bracket) = split_bracket(zone_seg);
            let slot: usize = bracket
                .and_then(|b| b.parse().ok())
                .ok_or_else(|| PlayError::UnresolvedReference { path: path.to_string() })?;
            Ok(Ref::StructureZoneSlot(role, key.to_string(), slot, field.to_string()))
        }
        [key, fib_seg, level_seg] if registry.structure_role.contains_key(*key) && *fib_seg == "fib" => {
            let role = registry.structure_role[*key];
            let (name, bracket) = split_bracket(level_seg);
            if name != "level" {
                return Err(PlayError::UnresolvedReference { path: path.to_string() }.into());
            }
            let ratio = bracket.ok_or_else(|| PlayError::UnresolvedReference { path: path.to_string() })?;
            Ok(Ref::FibLevel(role, key.to_string(), ratio.to_string()))
        }
        _ => Err(PlayError::UnresolvedReference { path: path.to_string() }.into()),
    }
}

fn is_float_typed_ref(r: &Ref) -> bool {
    !matches!(r, Ref::Literal(_))
}

fn parse_ref_operand(v: &Value, registry: &Registry) -> EngineResult<Operand> {
    if let Some(n) = v.as_f64() {
        return Ok(Operand::Literal(n));
    }
    if let Some(s) = v.as_str() {
        return Ok(Operand::Ref(parse_path(s, registry)?));
    }
    if let Some(map) = v.as_mapping() {
        if let Some(id) = map.get(Value::from("feature_id")).and_then(|v| v.as_str()) {
            let offset = map.get(Value::from("offset")).and_then(|v| v.as_i64()).unwrap_or(0);
            let role = *registry
                .feature_role
                .get(id)
                .ok_or_else(|| PlayError::UnresolvedReference { path: id.to_string() })?;
            let key = match map.get(Value::from("field")).and_then(|v| v.as_str()) {
                Some(f) => format!("{id}.{f}"),
                None => id.to_string(),
            };
            return Ok(Operand::Ref(Ref::Feature(role, key, offset)));
        }
        for (op_name, operands) in map {
            let Some(op) = op_name.as_str() else { continue };
            if let Some(arith) = arith_op_from_name(op) {
                let seq = operands.as_sequence().ok_or_else(|| PlayError::SchemaError {
                    path: op.to_string(),
                    msg: "arithmetic op expects a 2-element array".into(),
                })?;
                let lhs = parse_ref_operand(&seq[0], registry)?;
                let rhs = parse_ref_operand(&seq[1], registry)?;
                return Ok(Operand::Arith(Box::new(lhs), arith, Box::new(rhs)));
            }
        }
    }
    if let Some(seq) = v.as_sequence() {
        if seq.len() == 3 {
            if let Some(op) = seq[1].as_str().and_then(arith_op_from_name) {
                let lhs = parse_ref_operand(&seq[0], registry)?;
                let rhs = parse_ref_operand(&seq[2], registry)?;
                return Ok(Operand::Arith(Box::new(lhs), op, Box::new(rhs)));
            }
        }
    }
    Err(PlayError::SchemaError { path: format!("{v:?}"), msg: "could not parse operand".into() }.into())
}

fn arith_op_from_name(name: &str) -> Option<ArithOp> {
    Some(match name {
        "+" | "add" => ArithOp::Add,
        "-" | "sub" => ArithOp::Sub,
        "*" | "mul" => ArithOp::Mul,
        "/" | "div" => ArithOp::Div,
        "%" | "mod" => ArithOp::Rem,
        _ => return None,
    })
}

fn parse_cond(lhs_v: &Value, op_str: &str, rhs_v: &Value, tolerance: Option<f64>, registry: &Registry) -> EngineResult<CompiledExpr> {
    let lhs = parse_ref_operand(lhs_v, registry)?;

    if op_str == "cross_above" || op_str == "cross_below" {
        let rhs = parse_ref_operand(rhs_v, registry)?;
        let op = if op_str == "cross_above" { CrossOp::Above } else { CrossOp::Below };
        return Ok(CompiledExpr::Cross { lhs, op, rhs });
    }

    if matches!(op_str, "==" | "!=" | "in") {
        if let Operand::Ref(r) = &lhs {
            if is_float_typed_ref(r) {
                return Err(PlayError::InvalidEqualityOnFloat(format!("{r:?}")).into());
            }
        }
    }

    let op = match op_str {
        ">" => CondOp::Gt,
        "<" => CondOp::Lt,
        ">=" | "\u{2265}" => CondOp::Ge,
        "<=" | "\u{2264}" => CondOp::Le,
        "==" => CondOp::Eq,
        "!=" => CondOp::Ne,
        "between" => {
            let seq = rhs_v.as_sequence().ok_or_else(|| PlayError::SchemaError {
                path: "between".into(),
                msg: "expects [lo, hi]".into(),
            })?;
            let lo = parse_ref_operand(&seq[0], registry)?;
            let hi = parse_ref_operand(&seq[1], registry)?;
            return Ok(CompiledExpr::Cond { lhs, op: CondOp::Between { hi: Box::new(hi) }, rhs: lo });
        }
        "near_pct" => CondOp::NearPct { tolerance: tolerance.unwrap_or(0.0) },
        "near_abs" => CondOp::NearAbs { tolerance: tolerance.unwrap_or(0.0) },
        "in" => {
            let seq = rhs_v.as_sequence().ok_or_else(|| PlayError::SchemaError {
                path: "in".into(),
                msg: "expects an array of values".into(),
            })?;
            let values = seq.iter().filter_map(|v| v.as_f64()).collect();
            return Ok(CompiledExpr::Cond { lhs, op: CondOp::In(values), rhs: Operand::Literal(0.0) });
        }
        other => return Err(PlayError::SchemaError { path: other.to_string(), msg: "unknown operator".into() }.into()),
    };

    let rhs = parse_ref_operand(rhs_v, registry)?;
    Ok(CompiledExpr::Cond { lhs, op, rhs })
}

fn parse_duration_minutes(s: &str) -> Option<u32> {
    let s = s.trim();
    let (num, unit) = s.split_at(s.len().checked_sub(1)?);
    let n: u32 = num.parse().ok()?;
    match unit {
        "m" => Some(n),
        "h" => Some(n * 60),
        "d" => Some(n * 1440),
        _ => None,
    }
}

fn window_anchor(map: &serde_yaml::Mapping, registry: &Registry) -> WindowAnchor {
    let anchor_tf = map
        .get(Value::from("anchor_tf"))
        .and_then(|v| v.as_str())
        .and_then(|s| registry.role_for_tf_suffix(s));
    WindowAnchor { anchor_tf }
}

fn bars_from_window_body(map: &serde_yaml::Mapping) -> EngineResult<u32> {
    if let Some(b) = map.get(Value::from("bars")).and_then(|v| v.as_u64()) {
        if b as u32 > MAX_WINDOW_BARS {
            return Err(PlayError::WindowTooLarge { bars: b as u32 }.into());
        }
        return Ok(b as u32);
    }
    if let Some(d) = map.get(Value::from("duration")).and_then(|v| v.as_str()) {
        let minutes = parse_duration_minutes(d)
            .ok_or_else(|| PlayError::SchemaError { path: "duration".into(), msg: format!("unparseable duration '{d}'") })?;
        if minutes > MAX_WINDOW_DURATION_MIN {
            return Err(PlayError::WindowDurationTooLarge { minutes }.into());
        }
        return Ok(minutes);
    }
    Err(PlayError::SchemaError { path: "window".into(), msg: "missing 'bars' or 'duration'".into() }.into())
}

/// Compiles one raw YAML expression node into a `CompiledExpr`, validating
/// every reference against `registry` along the way.
pub fn compile_expr(v: &Value, registry: &Registry) -> EngineResult<CompiledExpr> {
    if let Some(s) = v.as_str() {
        let r = parse_path(s, registry)?;
        return Ok(CompiledExpr::Cond { lhs: Operand::Ref(r), op: CondOp::Ne, rhs: Operand::Literal(0.0) });
    }

    if let Some(seq) = v.as_sequence() {
        if seq.len() == 3 {
            let op = seq[1].as_str().unwrap_or_default();
            if arith_op_from_name(op).is_none() {
                return parse_cond(&seq[0], op, &seq[2], None, registry);
            }
        }
        if seq.len() == 4 {
            let op = seq[1].as_str().unwrap_or_default();
            let tolerance = seq[3].as_f64();
            return parse_cond(&seq[0], op, &seq[2], tolerance, registry);
        }
        let children: Vec<CompiledExpr> = seq.iter().map(|e| compile_expr(e, registry)).collect::<EngineResult<_>>()?;
        return Ok(CompiledExpr::All(children));
    }

    let map = v.as_mapping().ok_or_else(|| PlayError::SchemaError { path: format!("{v:?}"), msg: "expected a mapping".into() })?;

    if let Some(children) = map.get(Value::from("all")) {
        let seq = children.as_sequence().ok_or_else(|| PlayError::SchemaError { path: "all".into(), msg: "expects an array".into() })?;
        let compiled: Vec<CompiledExpr> = seq.iter().map(|e| compile_expr(e, registry)).collect::<EngineResult<_>>()?;
        return Ok(CompiledExpr::All(compiled));
    }
    if let Some(children) = map.get(Value::from("any")) {
        let seq = children.as_sequence().ok_or_else(|| PlayError::SchemaError { path: "any".into(), msg: "expects an array".into() })?;
        let compiled: Vec<CompiledExpr> = seq.iter().map(|e| compile_expr(e, registry)).collect::<EngineResult<_>>()?;
        return Ok(CompiledExpr::Any(compiled));
    }
    if let Some(inner) = map.get(Value::from("not")) {
        if let Some(seq) = inner.as_sequence() {
            let compiled: Vec<CompiledExpr> = seq.iter().map(|e| compile_expr(e, registry)).collect::<EngineResult<_>>()?;
            return Ok(CompiledExpr::Not(Box::new(CompiledExpr::All(compiled))));
        }
        return Ok(CompiledExpr::Not(Box::new(compile_expr(inner, registry)?)));
    }
    if let Some(name) = map.get(Value::from("setup")).and_then(|v| v.as_str()) {
        if !registry.setup_names.contains(name) {
            return Err(PlayError::UnresolvedReference { path: format!("setup:{name}") }.into());
        }
        return Ok(CompiledExpr::SetupRef(name.to_string()));
    }
    for key_name in [
        "holds_for",
        "occurred_within",
        "count_true",
        "holds_for_duration",
        "occurred_within_duration",
        "count_true_duration",
    ] {
        if let Some(body) = map.get(Value::from(key_name)) {
            let body_map = body.as_mapping().ok_or_else(|| PlayError::SchemaError { path: key_name.into(), msg: "expects a mapping body".into() })?;
            let bars = bars_from_window_body(body_map)?;
            let anchor = window_anchor(body_map, registry);
            let inner_expr = body_map
                .get(Value::from("expr"))
                .ok_or_else(|| PlayError::SchemaError { path: key_name.into(), msg: "missing 'expr'".into() })?;
            let compiled_inner = Box::new(compile_expr(inner_expr, registry)?);
            let base = key_name.trim_end_matches("_duration");
            return Ok(CompiledExpr::Window(match base {
                "holds_for" => WindowExpr::HoldsFor { bars, anchor, expr: compiled_inner },
                "occurred_within" => WindowExpr::OccurredWithin { bars, anchor, expr: compiled_inner },
                "count_true" => {
                    let min_true = body_map.get(Value::from("min_true")).and_then(|v| v.as_u64()).unwrap_or(1) as u32;
                    WindowExpr::CountTrue { bars, min_true, anchor, expr: compiled_inner }
                }
                _ => unreachable!(),
            }));
        }
    }
    if let (Some(lhs), Some(op), Some(rhs)) = (map.get(Value::from("lhs")), map.get(Value::from("op")), map.get(Value::from("rhs"))) {
        let tolerance = map.get(Value::from("tolerance")).and_then(|v| v.as_f64());
        return parse_cond(lhs, op.as_str().unwrap_or_default(), rhs, tolerance, registry);
    }

    Err(PlayError::SchemaError { path: format!("{v:?}"), msg: "unrecognized expression form".into() }.into())
}

/// `max(feature_warmup) + max(window_bars_at_exec_tf)` across every
/// reference/window in `expr` (§4.F).
pub fn compute_warmup(expr: &CompiledExpr, registry: &Registry) -> u32 {
    fn operand_warmup(op: &Operand, registry: &Registry) -> u32 {
        match op {
            Operand::Literal(_) => 0,
            Operand::Ref(Ref::Feature(_, key, _)) => {
                let id = key.split('.').next().unwrap_or(key);
                registry.feature_warmup.get(id).copied().unwrap_or(0)
            }
            Operand::Ref(_) => 0,
            Operand::Arith(l, _, r) => operand_warmup(l, registry).max(operand_warmup(r, registry)),
        }
    }

    match expr {
        CompiledExpr::All(children) | CompiledExpr::Any(children) => {
            children.iter().map(|c| compute_warmup(c, registry)).max().unwrap_or(0)
        }
        CompiledExpr::Not(inner) => compute_warmup(inner, registry),
        CompiledExpr::Cond { lhs, rhs, .. } => operand_warmup(lhs, registry).max(operand_warmup(rhs, registry)),
        CompiledExpr::Cross { lhs, rhs, .. } => operand_warmup(lhs, registry).max(operand_warmup(rhs, registry)) + 1,
        CompiledExpr::Window(w) => match w {
            WindowExpr::HoldsFor { bars, expr, .. }
            | WindowExpr::OccurredWithin { bars, expr, .. }
            | WindowExpr::CountTrue { bars, expr, .. } => bars + compute_warmup(expr, registry),
        },
        CompiledExpr::SetupRef(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_close() -> Registry {
        Registry::default()
    }

    #[test]
    fn parses_bare_ohlcv_path() {
        let registry = registry_with_close();
        let r = parse_path("close", &registry).unwrap();
        assert_eq!(r, Ref::Ohlcv(OhlcvField::Close, TimeframeRole::Exec, 0));
    }

    #[test]
    fn parses_offset_suffixed_path() {
        let registry = registry_with_close();
        let r = parse_path("close[3]", &registry).unwrap();
        assert_eq!(r, Ref::Ohlcv(OhlcvField::Close, TimeframeRole::Exec, 3));
    }

    #[test]
    fn rejects_equality_on_float_feature() {
        let mut registry = Registry::default();
        registry.feature_role.insert("rsi14".to_string(), TimeframeRole::Exec);
        let v: Value = serde_yaml::from_str("[\"rsi14\", \"==\", 50]").unwrap();
        let err = compile_expr(&v, &registry);
        assert!(err.is_err());
    }

    #[test]
    fn window_bars_over_cap_rejected() {
        let registry = Registry::default();
        let v: Value = serde_yaml::from_str("holds_for: {bars: 9999, expr: [\"close\", \">\", 0]}").unwrap();
        assert!(compile_expr(&v, &registry).is_err());
    }
}
