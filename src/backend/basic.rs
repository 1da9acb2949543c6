//! Default keyword vocabulary
//!
//! Compiles a practical subset of the constraint language into a closure
//! tree. Each keyword becomes one check capturing its constants; a schema
//! node becomes the conjunction of its checks. Unknown members are ignored.

use regex::Regex;
use serde_json::Value;

use super::{CompiledNode, EmitContext, KeywordBackend};
use crate::error::{Result, SchemaError};
use crate::resolve::resolve_url;
use crate::schema::SchemaRef;
use crate::unit::RefTarget;
use crate::validator::EvalScope;

const RULE_KEYWORDS: [&str; 17] = [
    "type",
    "enum",
    "const",
    "required",
    "properties",
    "additionalProperties",
    "items",
    "minItems",
    "maxItems",
    "minimum",
    "maximum",
    "minLength",
    "maxLength",
    "pattern",
    "allOf",
    "anyOf",
    "not",
];

/// The built-in keyword backend
#[derive(Debug, Default)]
pub struct BasicBackend;

impl KeywordBackend for BasicBackend {
    fn compile(&self, ctx: &mut EmitContext<'_>) -> Result<CompiledNode> {
        let schema = ctx.schema().clone();
        let base_id = ctx.base_id().to_string();
        compile_node(ctx, schema, base_id, "#".to_string())
    }

    fn is_rule_keyword(&self, keyword: &str) -> bool {
        RULE_KEYWORDS.contains(&keyword)
    }
}

fn compile_node(
    ctx: &mut EmitContext<'_>,
    schema: SchemaRef,
    base_id: String,
    schema_path: String,
) -> Result<CompiledNode> {
    if let Some(literal) = schema.as_bool() {
        ctx.emit(format!("{}: literal {}", schema_path, literal));
        return Ok(if literal {
            Box::new(|_, _| true)
        } else {
            Box::new(move |_, scope: &mut EvalScope| {
                scope.error(&schema_path, "false schema", "boolean schema is false");
                false
            })
        });
    }

    if !schema.node().is_object() {
        return Err(SchemaError::InvalidSchema(format!(
            "schema at {} must be an object or boolean",
            schema_path
        )));
    }

    // A declared $id rebases relative references for this subtree.
    let base_id = match schema.declared_id() {
        Some(id) => resolve_url(&base_id, id),
        None => base_id,
    };

    let mut checks: Vec<CompiledNode> = Vec::new();
    let mut add = |check: CompiledNode| checks.push(check);

    if let Some(reference) = schema.ref_value() {
        add(compile_ref(ctx, reference, &base_id, &schema_path)?);
    }
    if let Some(value) = schema.get("type") {
        add(compile_type(ctx, value, &schema_path)?);
    }
    if let Some(value) = schema.get("enum") {
        add(compile_enum(value, &schema_path)?);
    }
    if let Some(value) = schema.get("const") {
        add(compile_const(value.clone(), &schema_path));
    }
    if let Some(value) = schema.get("required") {
        add(compile_required(value, &schema_path)?);
    }
    if schema.get("properties").is_some() {
        add(compile_properties(ctx, &schema, base_id.clone(), &schema_path)?);
    }
    if schema.get("additionalProperties").is_some() {
        add(compile_additional(ctx, &schema, base_id.clone(), &schema_path)?);
    }
    if schema.get("items").is_some() {
        let items = schema.child("items").ok_or_else(|| {
            SchemaError::InvalidSchema(format!("unreadable items at {}", schema_path))
        })?;
        add(compile_items(ctx, items, base_id.clone(), &schema_path)?);
    }
    if let Some(value) = schema.get("minItems") {
        add(compile_length_bound(value, &schema_path, "minItems")?);
    }
    if let Some(value) = schema.get("maxItems") {
        add(compile_length_bound(value, &schema_path, "maxItems")?);
    }
    if let Some(value) = schema.get("minLength") {
        add(compile_length_bound(value, &schema_path, "minLength")?);
    }
    if let Some(value) = schema.get("maxLength") {
        add(compile_length_bound(value, &schema_path, "maxLength")?);
    }
    if let Some(value) = schema.get("minimum") {
        add(compile_numeric_bound(value, &schema_path, "minimum")?);
    }
    if let Some(value) = schema.get("maximum") {
        add(compile_numeric_bound(value, &schema_path, "maximum")?);
    }
    if let Some(value) = schema.get("pattern") {
        add(compile_pattern(ctx, value, &schema_path)?);
    }
    if schema.get("allOf").is_some() {
        add(compile_all_of(ctx, &schema, base_id.clone(), &schema_path)?);
    }
    if schema.get("anyOf").is_some() {
        add(compile_any_of(ctx, &schema, base_id.clone(), &schema_path)?);
    }
    if schema.get("not").is_some() {
        let inner = schema.child("not").ok_or_else(|| {
            SchemaError::InvalidSchema(format!("unreadable not at {}", schema_path))
        })?;
        add(compile_not(ctx, inner, base_id, &schema_path)?);
    }

    Ok(conjunction(checks))
}

fn conjunction(checks: Vec<CompiledNode>) -> CompiledNode {
    Box::new(move |instance, scope| {
        let mut valid = true;
        for check in &checks {
            if !check(instance, scope) {
                valid = false;
                if !scope.all_errors() {
                    return false;
                }
            }
        }
        valid
    })
}

fn compile_ref(
    ctx: &mut EmitContext<'_>,
    reference: &str,
    base_id: &str,
    schema_path: &str,
) -> Result<CompiledNode> {
    let resolved = resolve_url(base_id, reference);
    match ctx.resolve_ref(base_id, reference)? {
        None => Err(SchemaError::MissingRef { reference: resolved }),
        Some(RefTarget::Inline(target)) => {
            ctx.emit(format!("{}/$ref: inline {}", schema_path, resolved));
            compile_node(
                ctx,
                target,
                resolved,
                format!("{}/$ref", schema_path),
            )
        }
        Some(RefTarget::Validator(validator)) => {
            ctx.emit(format!("{}/$ref: call {}", schema_path, resolved));
            Ok(Box::new(move |instance, scope| {
                validator.validate_nested(instance, scope)
            }))
        }
    }
}

fn type_matches(name: &str, instance: &Value) -> bool {
    match name {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "number" => instance.is_number(),
        "integer" => {
            instance.is_i64()
                || instance.is_u64()
                || instance.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
        }
        _ => false,
    }
}

fn compile_type(
    ctx: &mut EmitContext<'_>,
    value: &Value,
    schema_path: &str,
) -> Result<CompiledNode> {
    let names: Vec<String> = match value {
        Value::String(name) => vec![name.clone()],
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str().map(String::from).ok_or_else(|| {
                    SchemaError::InvalidSchema(format!("non-string type name at {}", schema_path))
                })
            })
            .collect::<Result<_>>()?,
        _ => {
            return Err(SchemaError::InvalidSchema(format!(
                "type must be a string or array at {}",
                schema_path
            )))
        }
    };
    ctx.emit(format!("{}/type: {}", schema_path, names.join("|")));
    let path = format!("{}/type", schema_path);
    Ok(Box::new(move |instance, scope| {
        if names.iter().any(|n| type_matches(n, instance)) {
            true
        } else {
            scope.error(&path, "type", format!("must be {}", names.join(" or ")));
            false
        }
    }))
}

fn compile_enum(value: &Value, schema_path: &str) -> Result<CompiledNode> {
    let allowed = value
        .as_array()
        .cloned()
        .ok_or_else(|| {
            SchemaError::InvalidSchema(format!("enum must be an array at {}", schema_path))
        })?;
    let path = format!("{}/enum", schema_path);
    Ok(Box::new(move |instance, scope| {
        if allowed.iter().any(|v| v == instance) {
            true
        } else {
            scope.error(&path, "enum", "must be one of the allowed values");
            false
        }
    }))
}

fn compile_const(expected: Value, schema_path: &str) -> CompiledNode {
    let path = format!("{}/const", schema_path);
    Box::new(move |instance, scope| {
        if *instance == expected {
            true
        } else {
            scope.error(&path, "const", "must equal the constant value");
            false
        }
    })
}

fn compile_required(value: &Value, schema_path: &str) -> Result<CompiledNode> {
    let names: Vec<String> = value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .ok_or_else(|| {
            SchemaError::InvalidSchema(format!("required must be an array at {}", schema_path))
        })?;
    let path = format!("{}/required", schema_path);
    Ok(Box::new(move |instance, scope| {
        let map = match instance.as_object() {
            Some(map) => map,
            None => return true,
        };
        let mut valid = true;
        for name in &names {
            if !map.contains_key(name) {
                scope.error(&path, "required", format!("missing property {:?}", name));
                valid = false;
                if !scope.all_errors() {
                    return false;
                }
            }
        }
        valid
    }))
}

fn compile_properties(
    ctx: &mut EmitContext<'_>,
    schema: &SchemaRef,
    base_id: String,
    schema_path: &str,
) -> Result<CompiledNode> {
    let props = schema.child("properties").ok_or_else(|| {
        SchemaError::InvalidSchema(format!("unreadable properties at {}", schema_path))
    })?;
    let names: Vec<String> = props
        .node()
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .ok_or_else(|| {
            SchemaError::InvalidSchema(format!("properties must be an object at {}", schema_path))
        })?;

    let mut compiled: Vec<(String, CompiledNode)> = Vec::new();
    for name in names {
        let child = props.child(&name).ok_or_else(|| {
            SchemaError::InvalidSchema(format!("unreadable property {:?}", name))
        })?;
        let child_path = format!("{}/properties/{}", schema_path, name);
        compiled.push((name, compile_node(ctx, child, base_id.clone(), child_path)?));
    }

    Ok(Box::new(move |instance, scope| {
        let map = match instance.as_object() {
            Some(map) => map,
            None => return true,
        };
        let mut valid = true;
        for (name, check) in &compiled {
            if let Some(member) = map.get(name) {
                scope.push_segment(name.clone());
                let ok = check(member, scope);
                scope.pop_segment();
                if !ok {
                    valid = false;
                    if !scope.all_errors() {
                        return false;
                    }
                }
            }
        }
        valid
    }))
}

fn compile_additional(
    ctx: &mut EmitContext<'_>,
    schema: &SchemaRef,
    base_id: String,
    schema_path: &str,
) -> Result<CompiledNode> {
    let known: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();
    let path = format!("{}/additionalProperties", schema_path);

    let extra_check: Option<CompiledNode> = match schema.get("additionalProperties") {
        Some(Value::Bool(true)) => return Ok(Box::new(|_, _| true)),
        Some(Value::Bool(false)) => None,
        _ => {
            let child = schema.child("additionalProperties").ok_or_else(|| {
                SchemaError::InvalidSchema(format!("unreadable additionalProperties at {}", schema_path))
            })?;
            Some(compile_node(ctx, child, base_id, path.clone())?)
        }
    };

    Ok(Box::new(move |instance, scope| {
        let map = match instance.as_object() {
            Some(map) => map,
            None => return true,
        };
        let mut valid = true;
        for (name, member) in map {
            if known.contains(name) {
                continue;
            }
            let ok = match &extra_check {
                None => {
                    scope.push_segment(name.clone());
                    scope.error(&path, "additionalProperties", format!("unexpected property {:?}", name));
                    scope.pop_segment();
                    false
                }
                Some(check) => {
                    scope.push_segment(name.clone());
                    let ok = check(member, scope);
                    scope.pop_segment();
                    ok
                }
            };
            if !ok {
                valid = false;
                if !scope.all_errors() {
                    return false;
                }
            }
        }
        valid
    }))
}

fn compile_items(
    ctx: &mut EmitContext<'_>,
    items: SchemaRef,
    base_id: String,
    schema_path: &str,
) -> Result<CompiledNode> {
    let check = compile_node(ctx, items, base_id, format!("{}/items", schema_path))?;
    Ok(Box::new(move |instance, scope| {
        let array = match instance.as_array() {
            Some(array) => array,
            None => return true,
        };
        let mut valid = true;
        for (i, item) in array.iter().enumerate() {
            scope.push_segment(i.to_string());
            let ok = check(item, scope);
            scope.pop_segment();
            if !ok {
                valid = false;
                if !scope.all_errors() {
                    return false;
                }
            }
        }
        valid
    }))
}

fn compile_length_bound(value: &Value, schema_path: &str, keyword: &str) -> Result<CompiledNode> {
    let bound = value.as_u64().ok_or_else(|| {
        SchemaError::InvalidSchema(format!("{} must be a non-negative integer at {}", keyword, schema_path))
    })? as usize;
    let path = format!("{}/{}", schema_path, keyword);
    let keyword = keyword.to_string();
    Ok(Box::new(move |instance, scope| {
        let length = match (keyword.as_str(), instance) {
            ("minItems", Value::Array(a)) | ("maxItems", Value::Array(a)) => a.len(),
            ("minLength", Value::String(s)) | ("maxLength", Value::String(s)) => {
                s.chars().count()
            }
            _ => return true,
        };
        let ok = if keyword.starts_with("min") {
            length >= bound
        } else {
            length <= bound
        };
        if !ok {
            let direction = if keyword.starts_with("min") { "fewer" } else { "more" };
            scope.error(
                &path,
                &keyword,
                format!("must not have {} than {} {}", direction, bound, if keyword.ends_with("Items") { "items" } else { "characters" }),
            );
        }
        ok
    }))
}

fn compile_numeric_bound(value: &Value, schema_path: &str, keyword: &str) -> Result<CompiledNode> {
    let bound = value.as_f64().ok_or_else(|| {
        SchemaError::InvalidSchema(format!("{} must be a number at {}", keyword, schema_path))
    })?;
    let path = format!("{}/{}", schema_path, keyword);
    let is_min = keyword == "minimum";
    let keyword = keyword.to_string();
    Ok(Box::new(move |instance, scope| {
        let number = match instance.as_f64() {
            Some(n) => n,
            None => return true,
        };
        let ok = if is_min { number >= bound } else { number <= bound };
        if !ok {
            let relation = if is_min { ">=" } else { "<=" };
            scope.error(&path, &keyword, format!("must be {} {}", relation, bound));
        }
        ok
    }))
}

fn compile_pattern(
    ctx: &mut EmitContext<'_>,
    value: &Value,
    schema_path: &str,
) -> Result<CompiledNode> {
    let pattern = value.as_str().ok_or_else(|| {
        SchemaError::InvalidSchema(format!("pattern must be a string at {}", schema_path))
    })?;
    let regex = Regex::new(pattern)?;
    ctx.emit(format!("{}/pattern: {}", schema_path, pattern));
    let path = format!("{}/pattern", schema_path);
    let pattern = pattern.to_string();
    Ok(Box::new(move |instance, scope| {
        let text = match instance.as_str() {
            Some(text) => text,
            None => return true,
        };
        if regex.is_match(text) {
            true
        } else {
            scope.error(&path, "pattern", format!("must match pattern {:?}", pattern));
            false
        }
    }))
}

fn branch_schemas(
    schema: &SchemaRef,
    keyword: &str,
    schema_path: &str,
) -> Result<Vec<SchemaRef>> {
    let list = schema.child(keyword).ok_or_else(|| {
        SchemaError::InvalidSchema(format!("unreadable {} at {}", keyword, schema_path))
    })?;
    let len = list
        .node()
        .as_array()
        .map(Vec::len)
        .ok_or_else(|| {
            SchemaError::InvalidSchema(format!("{} must be an array at {}", keyword, schema_path))
        })?;
    (0..len)
        .map(|i| {
            list.child(&i.to_string()).ok_or_else(|| {
                SchemaError::InvalidSchema(format!("unreadable {}[{}]", keyword, i))
            })
        })
        .collect()
}

fn compile_all_of(
    ctx: &mut EmitContext<'_>,
    schema: &SchemaRef,
    base_id: String,
    schema_path: &str,
) -> Result<CompiledNode> {
    let mut branches = Vec::new();
    for (i, branch) in branch_schemas(schema, "allOf", schema_path)?.into_iter().enumerate() {
        let path = format!("{}/allOf/{}", schema_path, i);
        branches.push(compile_node(ctx, branch, base_id.clone(), path)?);
    }
    Ok(conjunction(branches))
}

fn compile_any_of(
    ctx: &mut EmitContext<'_>,
    schema: &SchemaRef,
    base_id: String,
    schema_path: &str,
) -> Result<CompiledNode> {
    let mut branches = Vec::new();
    for (i, branch) in branch_schemas(schema, "anyOf", schema_path)?.into_iter().enumerate() {
        let path = format!("{}/anyOf/{}", schema_path, i);
        branches.push(compile_node(ctx, branch, base_id.clone(), path)?);
    }
    let path = format!("{}/anyOf", schema_path);
    Ok(Box::new(move |instance, scope| {
        // Branch failures are probes, not reportable errors.
        let matched = branches.iter().any(|branch| {
            let mut probe = EvalScope::new(false);
            branch(instance, &mut probe)
        });
        if !matched {
            scope.error(&path, "anyOf", "must match at least one subschema");
        }
        matched
    }))
}

fn compile_not(
    ctx: &mut EmitContext<'_>,
    inner: SchemaRef,
    base_id: String,
    schema_path: &str,
) -> Result<CompiledNode> {
    let check = compile_node(ctx, inner, base_id, format!("{}/not", schema_path))?;
    let path = format!("{}/not", schema_path);
    Ok(Box::new(move |instance, scope| {
        let mut probe = EvalScope::new(false);
        if check(instance, &mut probe) {
            scope.error(&path, "not", "must not match the subschema");
            false
        } else {
            true
        }
    }))
}
