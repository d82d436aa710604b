//! Play loader & normalizer (§4.I): parses Play YAML, substitutes declared
//! `{{ var }}` template variables, validates against the indicator/structure
//! registries, rejects deprecated/reserved forms, and produces a
//! `CompiledPlay` whose every expression is already the AST from §4.F.

use std::collections::{HashMap, HashSet};

use serde_yaml::Value;

use crate::bar::InputSource;
use crate::dsl::ast::CompiledExpr;
use crate::dsl::compiler::{self, Registry};
use crate::error::{EngineResult, PlayError};
use crate::exchange::{ExchangeConfig, ExitMode};
use crate::feed::{FeatureSpec, TimeframeRole};
use crate::indicator::{IndicatorKind, IndicatorParams};
use crate::risk::{BreakEvenSpec, RiskPolicy, SizingModel, StopLossSpec, TakeProfitSpec};
use crate::structure::derived_zone::DerivedZoneDetector;
use crate::structure::fibonacci::{FibAnchorMode, FibonacciDetector};
use crate::structure::market_structure::MarketStructureDetector;
use crate::structure::rolling_window::{RollingWindowDetector, RollingWindowKind};
use crate::structure::swing::SwingDetector;
use crate::structure::trend::TrendDetector;
use crate::structure::zone::ZoneDetector;
use crate::structure::StructureKind;
use crate::time::Timeframe;

const DEPRECATED_KEYS: &[&str] = &["blocks", "signal_rules"];
const RESERVED_FLAGS: &[&str] = &["allow_flip", "allow_scale_in", "allow_scale_out"];

/// One declared structure node, still carrying its raw `uses:` dependency
/// name(s) — resolved into topological order by `order_structures`.
pub struct StructureDecl {
    pub id: String,
    pub role: TimeframeRole,
    pub kind: StructureKind,
    pub uses: Vec<String>,
    pub params: Value,
}

/// A single node in the compiled per-role structure DAG (§9 design note:
/// `Vec<Detector>` in topological order, borrowing only previously computed
/// state via the `uses` id).
pub enum StructureNode {
    Swing { id: String, detector: SwingDetector, atr_feature: Option<String>, min_warmup: u32 },
    Trend { id: String, detector: TrendDetector, uses: String, min_warmup: u32 },
    MarketStructure { id: String, detector: MarketStructureDetector, uses: String, min_warmup: u32 },
    Fibonacci { id: String, detector: FibonacciDetector, uses: String, trend_uses: Option<String>, min_warmup: u32 },
    Zone { id: String, detector: ZoneDetector, uses: String, atr_feature: Option<String>, min_warmup: u32 },
    DerivedZone { id: String, detector: DerivedZoneDetector, uses: String, min_warmup: u32 },
    RollingWindow { id: String, detector: RollingWindowDetector, source: InputSource, min_warmup: u32 },
}

impl StructureNode {
    pub fn id(&self) -> &str {
        match self {
            StructureNode::Swing { id, .. }
            | StructureNode::Trend { id, .. }
            | StructureNode::MarketStructure { id, .. }
            | StructureNode::Fibonacci { id, .. }
            | StructureNode::Zone { id, .. }
            | StructureNode::DerivedZone { id, .. }
            | StructureNode::RollingWindow { id, .. } => id,
        }
    }

    /// This node's own incremental warmup requirement, in bars of its role's
    /// timeframe. Preflight (§4.L) sums these along each role's structure
    /// chain as a safe (if slightly conservative) lower bound on readiness —
    /// exact cross-chain readiness is only known at runtime via `is_ready()`.
    pub fn min_warmup(&self) -> u32 {
        match self {
            StructureNode::Swing { min_warmup, .. }
            | StructureNode::Trend { min_warmup, .. }
            | StructureNode::MarketStructure { min_warmup, .. }
            | StructureNode::Fibonacci { min_warmup, .. }
            | StructureNode::Zone { min_warmup, .. }
            | StructureNode::DerivedZone { min_warmup, .. }
            | StructureNode::RollingWindow { min_warmup, .. } => *min_warmup,
        }
    }
}

/// A compiled action (entry/exit intent expression), keyed by its kind
/// (`enter_long`, `enter_short`, `exit_long`, `exit_short`), in evaluation
/// order: exits before entries, per §4.J step 2d.
pub struct CompiledAction {
    pub kind: String,
    pub expr: CompiledExpr,
    pub warmup_bars: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionPolicy {
    LongOnly,
    ShortOnly,
    Both,
}

pub struct Account {
    pub starting_equity: f64,
    pub max_leverage: f64,
    pub leverage: f64,
}

/// The fully compiled Play: everything the Bar Processor (§4.J) needs to
/// run a deterministic simulation, with no raw YAML left in the hot path.
pub struct CompiledPlay {
    pub name: String,
    pub symbol: String,
    pub exec_tf: Timeframe,
    pub med_tf: Option<Timeframe>,
    pub high_tf: Option<Timeframe>,
    pub account: Account,
    pub exchange_cfg: ExchangeConfig,
    pub risk: RiskPolicy,
    pub position_policy: PositionPolicy,
    pub features: HashMap<TimeframeRole, Vec<FeatureSpec>>,
    pub structures: HashMap<TimeframeRole, Vec<StructureNode>>,
    pub setups: HashMap<String, CompiledExpr>,
    pub actions: Vec<CompiledAction>,
    pub registry: Registry,
    /// `max(feature_warmup) + max(window_bars_at_exec_tf)` across every
    /// action and setup, scaled onto the exec timeframe (§4.F).
    pub warmup_bars_exec: u32,
}

fn get_str<'a>(map: &'a serde_yaml::Mapping, key: &str) -> Option<&'a str> {
    map.get(Value::from(key)).and_then(|v| v.as_str())
}

fn get_f64(map: &serde_yaml::Mapping, key: &str, default: f64) -> f64 {
    map.get(Value::from(key)).and_then(|v| v.as_f64()).unwrap_or(default)
}

fn get_u64(map: &serde_yaml::Mapping, key: &str, default: u64) -> u64 {
    map.get(Value::from(key)).and_then(|v| v.as_u64()).unwrap_or(default)
}

fn schema_err(path: &str, msg: &str) -> PlayError {
    PlayError::SchemaError { path: path.to_string(), msg: msg.to_string() }
}

/// Substitutes every `{{ name }}` occurrence with the declared value from
/// the Play's own `variables:` map, rejecting any reference not declared
/// (§6.1: "resolve variables").
fn substitute_variables(raw: &str, variables: &HashMap<String, String>) -> EngineResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str("{{");
            rest = after;
            continue;
        };
        let name = after[..end].trim();
        let value = variables
            .get(name)
            .ok_or_else(|| PlayError::UndeclaredVariable(name.to_string()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn parse_input_source(name: &str) -> InputSource {
    match name {
        "open" => InputSource::Open,
        "high" => InputSource::High,
        "low" => InputSource::Low,
        "volume" => InputSource::Volume,
        "hl2" => InputSource::Hl2,
        "hlc3" => InputSource::Hlc3,
        "ohlc4" => InputSource::Ohlc4,
        _ => InputSource::Close,
    }
}

fn parse_role(name: Option<&str>, roles: &Registry) -> TimeframeRole {
    match name {
        Some("med") => TimeframeRole::Med,
        Some("high") => TimeframeRole::High,
        _ => {
            let _ = roles;
            TimeframeRole::Exec
        }
    }
}

fn reject_deprecated_and_reserved(root: &serde_yaml::Mapping) -> EngineResult<()> {
    for key in DEPRECATED_KEYS {
        if root.contains_key(Value::from(*key)) {
            return Err(PlayError::Deprecated { key: key.to_string(), hint: format!("'{key}' was replaced by 'actions'/'setups'; see the v3.0.0 migration guide") }.into());
        }
    }
    if let Some(account) = root.get(Value::from("account")).and_then(|v| v.as_mapping()) {
        if get_str(account, "margin_mode") == Some("isolated") {
            return Err(PlayError::Deprecated {
                key: "margin_mode: \"isolated\"".into(),
                hint: "margin mode is implicitly isolated-USDT in v3.0.0; drop the key".into(),
            }
            .into());
        }
        for flag in RESERVED_FLAGS {
            if account.get(Value::from(*flag)).and_then(|v| v.as_bool()) == Some(true) {
                return Err(PlayError::ReservedFlagSet((*flag).to_string()).into());
            }
        }
    }
    Ok(())
}

fn build_features(
    root: &serde_yaml::Mapping,
    registry: &mut Registry,
) -> EngineResult<HashMap<TimeframeRole, Vec<FeatureSpec>>> {
    let mut out: HashMap<TimeframeRole, Vec<FeatureSpec>> = HashMap::new();
    let Some(features) = root.get(Value::from("features")).and_then(|v| v.as_mapping()) else {
        return Ok(out);
    };
    for (k, v) in features {
        let id = k.as_str().ok_or_else(|| schema_err("features", "feature id must be a string"))?.to_string();
        let body = v.as_mapping().ok_or_else(|| schema_err(&id, "feature body must be a mapping"))?;
        let kind_name = get_str(body, "indicator_type").ok_or_else(|| schema_err(&id, "missing 'indicator_type'"))?;
        let kind = IndicatorKind::from_name(kind_name)?;
        let params = IndicatorParams {
            length: get_u64(body, "length", 14) as u32,
            fast: get_u64(body, "fast", 12) as u32,
            slow: get_u64(body, "slow", 26) as u32,
            signal: get_u64(body, "signal", 9) as u32,
            multiplier: get_f64(body, "multiplier", 2.0),
        };
        let input = parse_input_source(get_str(body, "input_source").unwrap_or("close"));
        let role = parse_role(get_str(body, "tf"), registry);
        let warmup = kind.warmup_bars(params.length, params.signal) as u32;

        registry.feature_role.insert(id.clone(), role);
        registry.feature_warmup.insert(id.clone(), warmup);

        out.entry(role).or_default().push(FeatureSpec { id, kind, params, input });
    }
    Ok(out)
}

/// Topologically sorts a role's declared structures by `uses:`, detecting
/// cycles (§3.4: "Dependencies form a DAG; cycles are a compile-time error").
fn topo_sort_structures(decls: Vec<StructureDecl>) -> EngineResult<Vec<StructureDecl>> {
    let by_id: HashMap<&str, &StructureDecl> = decls.iter().map(|d| (d.id.as_str(), d)).collect();
    let mut visited: HashSet<String> = HashSet::new();
    let mut visiting: HashSet<String> = HashSet::new();
    let mut order: Vec<String> = Vec::new();

    fn visit(
        id: &str,
        by_id: &HashMap<&str, &StructureDecl>,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> EngineResult<()> {
        if visited.contains(id) {
            return Ok(());
        }
        if visiting.contains(id) {
            return Err(PlayError::CyclicStructure { cycle: id.to_string() }.into());
        }
        let Some(decl) = by_id.get(id) else {
            return Err(PlayError::DependencyError { key: id.to_string(), uses: id.to_string(), role: String::new() }.into());
        };
        visiting.insert(id.to_string());
        for dep in &decl.uses {
            visit(dep, by_id, visited, visiting, order)?;
        }
        visiting.remove(id);
        visited.insert(id.to_string());
        order.push(id.to_string());
        Ok(())
    }

    for decl in &decls {
        visit(&decl.id, &by_id, &mut visited, &mut visiting, &mut order)?;
    }

    let mut by_id_owned: HashMap<String, StructureDecl> = decls.into_iter().map(|d| (d.id.clone(), d)).collect();
    Ok(order.into_iter().filter_map(|id| by_id_owned.remove(&id)).collect())
}

fn parse_structure_decls(root: &serde_yaml::Mapping, role: TimeframeRole, role_key: &str) -> EngineResult<Vec<StructureDecl>> {
    let mut out = Vec::new();
    let Some(structures) = root.get(Value::from("structures")).and_then(|v| v.as_mapping()) else {
        return Ok(out);
    };
    let Some(list) = structures.get(Value::from(role_key)).and_then(|v| v.as_sequence()) else {
        return Ok(out);
    };
    for item in list {
        let body = item.as_mapping().ok_or_else(|| schema_err(role_key, "structure entry must be a mapping"))?;
        let id = get_str(body, "id").ok_or_else(|| schema_err(role_key, "structure missing 'id'"))?.to_string();
        let type_name = get_str(body, "type").ok_or_else(|| schema_err(&id, "structure missing 'type'"))?;
        let kind = StructureKind::from_name(type_name)?;
        let uses: Vec<String> = body
            .get(Value::from("uses"))
            .and_then(|v| v.as_sequence())
            .map(|seq| seq.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .or_else(|| get_str(body, "uses").map(|s| vec![s.to_string()]))
            .unwrap_or_default();
        out.push(StructureDecl { id, role, kind, uses, params: Value::Mapping(body.clone()) });
    }
    Ok(out)
}

fn build_structure_node(decl: StructureDecl, built: &HashMap<String, ()>) -> EngineResult<StructureNode> {
    let _ = built;
    let params = decl.params.as_mapping().cloned().unwrap_or_default();
    match decl.kind {
        StructureKind::Swing => {
            let left = get_u64(&params, "left", 2) as u32;
            let right = get_u64(&params, "right", 2) as u32;
            let min_atr_move = params.get(Value::from("min_atr_move")).and_then(|v| v.as_f64());
            let atr_feature = get_str(&params, "atr_key").map(str::to_string);
            let min_warmup = left + right + 1;
            Ok(StructureNode::Swing { id: decl.id, detector: SwingDetector::new(left, right, min_atr_move), atr_feature, min_warmup })
        }
        StructureKind::Trend => {
            let uses = decl.uses.first().cloned().ok_or_else(|| PlayError::DependencyError { key: decl.id.clone(), uses: String::new(), role: "trend".into() })?;
            let n = get_u64(&params, "wave_history_size", 4) as u32;
            Ok(StructureNode::Trend { id: decl.id, detector: TrendDetector::new(n), uses, min_warmup: 1 })
        }
        StructureKind::MarketStructure => {
            let uses = decl.uses.first().cloned().ok_or_else(|| PlayError::DependencyError { key: decl.id.clone(), uses: String::new(), role: "market_structure".into() })?;
            let confirmation_close = params.get(Value::from("confirmation_close")).and_then(|v| v.as_bool()).unwrap_or(false);
            Ok(StructureNode::MarketStructure { id: decl.id, detector: MarketStructureDetector::new(confirmation_close), uses, min_warmup: 1 })
        }
        StructureKind::Fibonacci => {
            let uses = decl.uses.first().cloned().ok_or_else(|| PlayError::DependencyError { key: decl.id.clone(), uses: String::new(), role: "fibonacci".into() })?;
            let trend_uses = decl.uses.get(1).cloned();
            let mode = if get_str(&params, "anchor_mode") == Some("last_wave") { FibAnchorMode::LastWave } else { FibAnchorMode::PairedPivot };
            let ratios: Vec<f64> = params
                .get(Value::from("ratios"))
                .and_then(|v| v.as_sequence())
                .map(|seq| seq.iter().filter_map(|v| v.as_f64()).collect())
                .unwrap_or_else(|| vec![0.236, 0.382, 0.5, 0.618, 0.786]);
            let extension = params.get(Value::from("extension")).and_then(|v| v.as_bool()).unwrap_or(false);
            Ok(StructureNode::Fibonacci { id: decl.id, detector: FibonacciDetector::new(mode, ratios, extension), uses, trend_uses, min_warmup: 1 })
        }
        StructureKind::Zone => {
            let uses = decl.uses.first().cloned().ok_or_else(|| PlayError::DependencyError { key: decl.id.clone(), uses: String::new(), role: "zone".into() })?;
            let is_demand = get_str(&params, "side") != Some("supply");
            let atr_width_mult = params.get(Value::from("atr_width_mult")).and_then(|v| v.as_f64());
            let atr_feature = get_str(&params, "atr_key").map(str::to_string);
            Ok(StructureNode::Zone { id: decl.id, detector: ZoneDetector::new(is_demand, atr_width_mult), uses, atr_feature, min_warmup: 1 })
        }
        StructureKind::DerivedZone => {
            let uses = decl.uses.first().cloned().ok_or_else(|| PlayError::DependencyError { key: decl.id.clone(), uses: String::new(), role: "derived_zone".into() })?;
            let max_active = get_u64(&params, "max_active", 3) as usize;
            let ratios: Vec<f64> = params
                .get(Value::from("ratios"))
                .and_then(|v| v.as_sequence())
                .map(|seq| seq.iter().filter_map(|v| v.as_f64()).collect())
                .unwrap_or_else(|| vec![0.5, 0.618, 0.786]);
            Ok(StructureNode::DerivedZone { id: decl.id, detector: DerivedZoneDetector::new(max_active, ratios), uses, min_warmup: 1 })
        }
        StructureKind::RollingWindow => {
            let kind = if get_str(&params, "mode") == Some("min") { RollingWindowKind::Min } else { RollingWindowKind::Max };
            let size = get_u64(&params, "size", 20) as u32;
            let source = parse_input_source(get_str(&params, "input_source").unwrap_or("close"));
            Ok(StructureNode::RollingWindow { id: decl.id, detector: RollingWindowDetector::new(kind, size), source, min_warmup: size })
        }
    }
}

fn build_structures(root: &serde_yaml::Mapping, registry: &mut Registry) -> EngineResult<HashMap<TimeframeRole, Vec<StructureNode>>> {
    let mut out = HashMap::new();
    for (role, role_key) in [(TimeframeRole::Exec, "exec"), (TimeframeRole::Med, "med"), (TimeframeRole::High, "high")] {
        let decls = parse_structure_decls(root, role, role_key)?;
        for d in &decls {
            registry.structure_role.insert(d.id.clone(), role);
        }
        let sorted = topo_sort_structures(decls)?;
        let built_marker: HashMap<String, ()> = HashMap::new();
        let mut nodes = Vec::with_capacity(sorted.len());
        for decl in sorted {
            nodes.push(build_structure_node(decl, &built_marker)?);
        }
        out.insert(role, nodes);
    }
    Ok(out)
}

fn build_setups(root: &serde_yaml::Mapping, registry: &mut Registry) -> EngineResult<HashMap<String, CompiledExpr>> {
    let mut names = HashSet::new();
    if let Some(setups) = root.get(Value::from("setups")).and_then(|v| v.as_mapping()) {
        for (k, _) in setups {
            if let Some(name) = k.as_str() {
                names.insert(name.to_string());
            }
        }
    }
    registry.setup_names = names;

    let mut out = HashMap::new();
    if let Some(setups) = root.get(Value::from("setups")).and_then(|v| v.as_mapping()) {
        for (k, v) in setups {
            let name = k.as_str().ok_or_else(|| schema_err("setups", "setup name must be a string"))?.to_string();
            let compiled = compiler::compile_expr(v, registry)?;
            out.insert(name, compiled);
        }
    }
    // Acyclicity check (§3.5/§8.7): walk every setup's reference graph.
    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    fn walk(name: &str, setups: &HashMap<String, CompiledExpr>, visiting: &mut HashSet<String>, visited: &mut HashSet<String>) -> EngineResult<()> {
        if visited.contains(name) {
            return Ok(());
        }
        if visiting.contains(name) {
            return Err(PlayError::CyclicSetup { cycle: name.to_string() }.into());
        }
        visiting.insert(name.to_string());
        if let Some(expr) = setups.get(name) {
            collect_setup_refs(expr, &mut |r| walk(r, setups, visiting, visited)).transpose()?;
        }
        visiting.remove(name);
        visited.insert(name.to_string());
        Ok(())
    }
    for name in out.keys().cloned().collect::<Vec<_>>() {
        walk(&name, &out, &mut visiting, &mut visited)?;
    }
    Ok(out)
}

fn collect_setup_refs<F: FnMut(&str) -> EngineResult<()>>(expr: &CompiledExpr, f: &mut F) -> Option<EngineResult<()>> {
    match expr {
        CompiledExpr::All(children) | CompiledExpr::Any(children) => {
            for c in children {
                if let Some(Err(e)) = collect_setup_refs(c, f) {
                    return Some(Err(e));
                }
            }
            None
        }
        CompiledExpr::Not(inner) => collect_setup_refs(inner, f),
        CompiledExpr::Window(w) => {
            let inner = match w {
                crate::dsl::ast::WindowExpr::HoldsFor { expr, .. }
                | crate::dsl::ast::WindowExpr::OccurredWithin { expr, .. }
                | crate::dsl::ast::WindowExpr::CountTrue { expr, .. } => expr,
            };
            collect_setup_refs(inner, f)
        }
        CompiledExpr::SetupRef(name) => Some(f(name)),
        _ => None,
    }
}

fn build_actions(root: &serde_yaml::Mapping, registry: &Registry) -> EngineResult<Vec<CompiledAction>> {
    let mut out = Vec::new();
    let Some(actions) = root.get(Value::from("actions")).and_then(|v| v.as_mapping()) else {
        return Ok(out);
    };
    // Exits evaluated before entries (§4.J step 2d).
    let order = ["exit_long", "exit_short", "enter_long", "enter_short"];
    for kind in order {
        if let Some(v) = actions.get(Value::from(kind)) {
            let expr = compiler::compile_expr(v, registry)?;
            let warmup = compiler::compute_warmup(&expr, registry);
            out.push(CompiledAction { kind: kind.to_string(), expr, warmup_bars: warmup });
        }
    }
    Ok(out)
}

fn build_risk(root: &serde_yaml::Mapping) -> RiskPolicy {
    let Some(risk) = root.get(Value::from("risk")).and_then(|v| v.as_mapping()) else {
        return RiskPolicy {
            sizing: SizingModel::PercentEquity { pct: 10.0 },
            leverage: 1.0,
            max_leverage: 1.0,
            stop_loss: None,
            take_profit: None,
            break_even: None,
            max_drawdown_pct: 100.0,
            clamp_over_leverage_cap: true,
        };
    };
    let leverage = get_f64(risk, "leverage", 1.0);
    let max_leverage = get_f64(risk, "max_leverage", leverage);

    let sizing = match risk.get(Value::from("sizing")).and_then(|v| v.as_mapping()) {
        Some(s) => match get_str(s, "model") {
            Some("risk_based") => SizingModel::RiskBased { pct: get_f64(s, "pct", 1.0) },
            Some("fixed_usdt") => SizingModel::FixedUsdt { notional: get_f64(s, "notional", 100.0) },
            _ => SizingModel::PercentEquity { pct: get_f64(s, "pct", 10.0) },
        },
        None => SizingModel::PercentEquity { pct: 10.0 },
    };

    let stop_loss = risk.get(Value::from("stop_loss")).and_then(|v| v.as_mapping()).map(|s| match get_str(s, "type") {
        Some("atr_multiple") => StopLossSpec::AtrMultiple { multiple: get_f64(s, "multiple", 1.5) },
        Some("structure") => StopLossSpec::Structure { buffer_pct: get_f64(s, "buffer_pct", 0.1) },
        Some("fixed_points") => StopLossSpec::FixedPoints { points: get_f64(s, "points", 100.0) },
        Some("trailing_atr") => StopLossSpec::TrailingAtr { multiple: get_f64(s, "multiple", 1.5), activation_pct: get_f64(s, "activation_pct", 1.0) },
        Some("trailing_pct") => StopLossSpec::TrailingPct { pct: get_f64(s, "pct", 1.0), activation_pct: get_f64(s, "activation_pct", 1.0) },
        _ => StopLossSpec::Percent { pct: get_f64(s, "pct", 2.0) },
    });

    let take_profit = risk.get(Value::from("take_profit")).and_then(|v| v.as_mapping()).map(|s| match get_str(s, "type") {
        Some("rr_ratio") => TakeProfitSpec::RrRatio { multiple: get_f64(s, "multiple", 2.0) },
        Some("atr_multiple") => TakeProfitSpec::AtrMultiple { multiple: get_f64(s, "multiple", 3.0) },
        Some("fixed_points") => TakeProfitSpec::FixedPoints { points: get_f64(s, "points", 200.0) },
        _ => TakeProfitSpec::Percent { pct: get_f64(s, "pct", 4.0) },
    });

    let break_even = risk.get(Value::from("break_even")).and_then(|v| v.as_mapping()).map(|b| BreakEvenSpec {
        activation_pct: get_f64(b, "activation_pct", 1.0),
        offset_pct: get_f64(b, "offset_pct", 0.1),
    });

    RiskPolicy {
        sizing,
        leverage,
        max_leverage,
        stop_loss,
        take_profit,
        break_even,
        max_drawdown_pct: get_f64(risk, "max_drawdown_pct", 100.0),
        clamp_over_leverage_cap: risk.get(Value::from("clamp_over_leverage_cap")).and_then(|v| v.as_bool()).unwrap_or(true),
    }
}

fn build_exchange_cfg(root: &serde_yaml::Mapping) -> ExchangeConfig {
    let mut cfg = ExchangeConfig::default();
    if let Some(account) = root.get(Value::from("account")).and_then(|v| v.as_mapping()) {
        cfg.maintenance_margin_rate = get_f64(account, "maintenance_margin_rate", cfg.maintenance_margin_rate);
        if let Some(fee) = account.get(Value::from("fee")).and_then(|v| v.as_mapping()) {
            cfg.taker_bps = get_f64(fee, "taker_bps", cfg.taker_bps);
            cfg.maker_bps = get_f64(fee, "maker_bps", cfg.maker_bps);
        }
        if let Some(slip) = account.get(Value::from("slippage")).and_then(|v| v.as_mapping()) {
            cfg.slippage_bps = get_f64(slip, "bps", cfg.slippage_bps);
        }
        cfg.default_funding_rate_bps = get_f64(account, "default_funding_rate_bps", cfg.default_funding_rate_bps);
    }
    if let Some(risk) = root.get(Value::from("risk")).and_then(|v| v.as_mapping()) {
        cfg.exit_mode = match get_str(risk, "exit_mode") {
            Some("sl_tp_only") => ExitMode::SlTpOnly,
            Some("signal") => ExitMode::Signal,
            _ => ExitMode::FirstHit,
        };
    }
    cfg
}

/// Loads and compiles a Play from raw YAML text. `variables` supplies the
/// `{{ name }}` substitutions the Play's own `variables:` block declares.
pub fn load_play(raw_yaml: &str, variables: HashMap<String, String>) -> EngineResult<CompiledPlay> {
    let substituted = substitute_variables(raw_yaml, &variables)?;
    let doc: Value = serde_yaml::from_str(&substituted)?;
    let root = doc.as_mapping().ok_or_else(|| schema_err("$", "Play document must be a mapping"))?;

    reject_deprecated_and_reserved(root)?;

    let name = get_str(root, "name").unwrap_or("unnamed").to_string();
    let symbol = get_str(root, "symbol").unwrap_or("BTCUSDT").to_string();

    let timeframes = root.get(Value::from("timeframes")).and_then(|v| v.as_mapping()).cloned().unwrap_or_default();
    let low_tf: Timeframe = get_str(&timeframes, "low_tf").unwrap_or("1m").parse()?;
    let med_tf: Timeframe = get_str(&timeframes, "med_tf").unwrap_or("15m").parse()?;
    let high_tf: Timeframe = get_str(&timeframes, "high_tf").unwrap_or("1h").parse()?;
    crate::time::validate_hierarchy(low_tf, med_tf, high_tf)?;
    let exec_name = get_str(&timeframes, "exec").unwrap_or("med");
    let exec_tf = match exec_name {
        "low" => low_tf,
        "high" => high_tf,
        _ => med_tf,
    };

    let mut registry = Registry::default();
    registry.role_tf.insert(TimeframeRole::Exec, exec_tf);
    if med_tf != exec_tf {
        registry.role_tf.insert(TimeframeRole::Med, med_tf);
    }
    if high_tf != exec_tf && high_tf != med_tf {
        registry.role_tf.insert(TimeframeRole::High, high_tf);
    }

    let features = build_features(root, &mut registry)?;
    let structures = build_structures(root, &mut registry)?;
    let setups = build_setups(root, &mut registry)?;
    let actions = build_actions(root, &registry)?;

    let account_raw = root.get(Value::from("account")).and_then(|v| v.as_mapping()).cloned().unwrap_or_default();
    let risk = build_risk(root);
    let account = Account {
        starting_equity: get_f64(&account_raw, "starting_equity", 10_000.0),
        max_leverage: get_f64(&account_raw, "max_leverage", risk.max_leverage),
        leverage: risk.leverage,
    };
    let exchange_cfg = build_exchange_cfg(root);

    let position_policy = match get_str(root, "position_policy") {
        Some("long") => PositionPolicy::LongOnly,
        Some("short") => PositionPolicy::ShortOnly,
        _ => PositionPolicy::Both,
    };

    let action_warmup = actions.iter().map(|a| a.warmup_bars).max().unwrap_or(0);
    let structure_warmup: u32 = structures
        .get(&TimeframeRole::Exec)
        .map(|nodes| nodes.iter().map(StructureNode::min_warmup).sum())
        .unwrap_or(0);
    let warmup_bars_exec = action_warmup.max(structure_warmup);

    Ok(CompiledPlay {
        name,
        symbol,
        exec_tf,
        med_tf: (med_tf != exec_tf).then_some(med_tf),
        high_tf: (high_tf != exec_tf && high_tf != med_tf).then_some(high_tf),
        account,
        exchange_cfg,
        risk,
        position_policy,
        features,
        structures,
        setups,
        actions,
        registry,
        warmup_bars_exec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_play() -> &'static str {
        r#"
version: v3.0.0
name: ema_cross_{{ sym }}
symbol: BTCUSDT
timeframes:
  low_tf: 1m
  med_tf: 15m
  high_tf: 1h
  exec: med
account:
  starting_equity: 10000
features:
  ema_fast:
    indicator_type: ema
    length: 9
  ema_slow:
    indicator_type: ema
    length: 21
actions:
  enter_long: ["ema_fast", "cross_above", "ema_slow"]
  exit_long: ["ema_fast", "cross_below", "ema_slow"]
risk:
  leverage: 1
  max_leverage: 1
  stop_loss: { type: percent, pct: 2 }
  take_profit: { type: percent, pct: 4 }
position_policy: long
"#
    }

    #[test]
    fn loads_minimal_play_with_variable_substitution() {
        let mut vars = HashMap::new();
        vars.insert("sym".to_string(), "btc".to_string());
        let play = load_play(minimal_play(), vars).unwrap();
        assert_eq!(play.name, "ema_cross_btc");
        assert_eq!(play.actions.len(), 2);
        assert!(play.warmup_bars_exec >= 21);
    }

    #[test]
    fn missing_variable_is_rejected() {
        let err = load_play(minimal_play(), HashMap::new());
        assert!(err.is_err());
    }

    #[test]
    fn rejects_deprecated_margin_mode() {
        let yaml = r#"
name: x
symbol: BTCUSDT
account:
  starting_equity: 1000
  margin_mode: "isolated"
"#;
        assert!(load_play(yaml, HashMap::new()).is_err());
    }

    #[test]
    fn rejects_reserved_flag_set_true() {
        let yaml = r#"
name: x
symbol: BTCUSDT
account:
  starting_equity: 1000
  allow_flip: true
"#;
        assert!(load_play(yaml, HashMap::new()).is_err());
    }
}
