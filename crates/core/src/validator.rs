//! Status-code and body-shape validation

use crate::descriptor::RequestDescriptor;
use crate::error::ValidationError;
use crate::serializer::ResponseObject;
use serde_json::Value;
use std::collections::BTreeMap;

/// Expected shape of a JSON body.
///
/// Object shapes list required members; extra members in the body are fine.
/// A member whose value is `null` satisfies any leaf shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonShape {
    /// Any value
    Any,
    /// A string
    String,
    /// A number
    Number,
    /// A boolean
    Bool,
    /// An array; every element must match the element shape when given
    Array(Option<Box<JsonShape>>),
    /// An object with (at least) these members
    Object(BTreeMap<String, JsonShape>),
}

impl JsonShape {
    /// Array whose elements all match `element`
    #[must_use]
    pub fn array_of(element: Self) -> Self {
        Self::Array(Some(Box::new(element)))
    }

    /// Object shape built from `(member, shape)` pairs
    pub fn object<K: Into<String>>(members: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Object(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Default status check: 200–299 inclusive
#[must_use]
pub fn validate_status(status_code: u16) -> bool {
    (200..=299).contains(&status_code)
}

/// Check `value` against an optional shape rule. No rule is always valid.
#[must_use]
pub fn validate_body(value: &Value, rule: Option<&JsonShape>) -> bool {
    rule.is_none_or(|shape| matches_shape(value, shape))
}

fn matches_shape(value: &Value, shape: &JsonShape) -> bool {
    match (shape, value) {
        (JsonShape::Any, _) => true,
        (JsonShape::Object(members), Value::Object(map)) => {
            members.iter().all(|(name, member_shape)| match map.get(name) {
                Some(Value::Null) => true,
                Some(member) => matches_shape(member, member_shape),
                None => false,
            })
        }
        (JsonShape::Array(element), Value::Array(items)) => element
            .as_deref()
            .is_none_or(|element| items.iter().all(|item| matches_shape(item, element))),
        (JsonShape::String, Value::String(_))
        | (JsonShape::Number, Value::Number(_))
        | (JsonShape::Bool, Value::Bool(_)) => true,
        _ => false,
    }
}

/// Run the descriptor's validators over a response.
///
/// The body rule only applies to JSON responses.
pub fn validate_response(
    descriptor: &dyn RequestDescriptor,
    status_code: u16,
    object: Option<&ResponseObject>,
) -> Result<(), ValidationError> {
    if !descriptor.status_code_validator(status_code) {
        return Err(ValidationError::InvalidStatusCode { status_code });
    }
    if let Some(ResponseObject::Json(json)) = object
        && !validate_body(json, descriptor.json_validator().as_ref())
    {
        return Err(ValidationError::InvalidJsonFormat);
    }
    Ok(())
}
