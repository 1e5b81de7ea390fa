//! RFC 9421 signature-base construction.
//!
//! Builds the canonical byte string a signature covers from a
//! [`SignableMessage`] and the per-signature parameters. Construction is
//! deterministic: byte-identical inputs yield byte-identical bases. A covered
//! component that cannot be produced from the message is a hard
//! `component-not-found` failure; partial bases are never emitted.

use std::fmt;
use std::str::FromStr;

use crate::error::SageError;
use crate::keys::SignatureAlgorithm;
use crate::request::SignableMessage;
use crate::sfv::{BareItem, InnerList, Item, Parameters};

/// One entry of the covered-component list.
///
/// Either a derived component (`@method`, `@authority`, …, optionally
/// `@query-param;name="…"`) or a lowercase header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveredComponent {
    identifier: String,
    /// Only `@query-param` carries a `name` parameter.
    param_name: Option<String>,
}

impl CoveredComponent {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: if identifier.starts_with('@') {
                identifier.to_owned()
            } else {
                identifier.to_ascii_lowercase()
            },
            param_name: None,
        }
    }

    pub fn query_param(name: &str) -> Self {
        Self { identifier: "@query-param".into(), param_name: Some(name.to_owned()) }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn param_name(&self) -> Option<&str> {
        self.param_name.as_deref()
    }

    fn to_item(&self) -> Item {
        let mut params = Parameters::default();
        if let Some(name) = &self.param_name {
            params.0.push(("name".into(), BareItem::String(name.clone())));
        }
        Item { value: BareItem::String(self.identifier.clone()), params }
    }

    fn from_item(item: &Item) -> Result<Self, SageError> {
        let identifier = match &item.value {
            BareItem::String(s) => s.clone(),
            other => {
                return Err(SageError::InvalidArgument(format!(
                    "covered component must be a string, got {other:?}"
                )))
            }
        };
        let param_name = match item.params.get("name") {
            Some(BareItem::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(SageError::InvalidArgument(format!(
                    "component name parameter must be a string, got {other:?}"
                )))
            }
            None => None,
        };
        if param_name.is_some() && identifier != "@query-param" {
            return Err(SageError::InvalidArgument(format!(
                "name parameter is only valid on @query-param, found on {identifier}"
            )));
        }
        if identifier == "@query-param" && param_name.is_none() {
            return Err(SageError::InvalidArgument(
                "@query-param requires a name parameter".into(),
            ));
        }
        Ok(Self { identifier, param_name })
    }
}

impl fmt::Display for CoveredComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.param_name {
            Some(name) => write!(f, "\"{}\";name=\"{}\"", self.identifier, name),
            None => write!(f, "\"{}\"", self.identifier),
        }
    }
}

impl FromStr for CoveredComponent {
    type Err = SageError;

    /// Accepts `@method`, `content-digest`, or `@query-param;name="id"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(';') {
            None => Ok(Self::new(s)),
            Some((id, rest)) => {
                let name = rest
                    .strip_prefix("name=\"")
                    .and_then(|r| r.strip_suffix('"'))
                    .ok_or_else(|| {
                        SageError::InvalidArgument(format!(
                            "malformed component parameter in {s:?}"
                        ))
                    })?;
                if id != "@query-param" {
                    return Err(SageError::InvalidArgument(format!(
                        "name parameter is only valid on @query-param, found on {id}"
                    )));
                }
                Ok(Self::query_param(name))
            }
        }
    }
}

/// Per-signature descriptor, serialized into `Signature-Input`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureInputParams {
    pub covered_components: Vec<CoveredComponent>,
    pub key_id: Option<String>,
    pub algorithm: Option<SignatureAlgorithm>,
    pub created: Option<i64>,
    pub expires: Option<i64>,
    pub nonce: Option<String>,
}

impl SignatureInputParams {
    /// The RFC 8941 inner-list form of these parameters.
    pub fn to_inner_list(&self) -> InnerList {
        let mut params = Parameters::default();
        if let Some(keyid) = &self.key_id {
            params.0.push(("keyid".into(), BareItem::String(keyid.clone())));
        }
        if let Some(alg) = self.algorithm {
            params.0.push(("alg".into(), BareItem::String(alg.as_str().into())));
        }
        if let Some(created) = self.created {
            params.0.push(("created".into(), BareItem::Integer(created)));
        }
        if let Some(expires) = self.expires {
            params.0.push(("expires".into(), BareItem::Integer(expires)));
        }
        if let Some(nonce) = &self.nonce {
            params.0.push(("nonce".into(), BareItem::String(nonce.clone())));
        }
        InnerList {
            items: self.covered_components.iter().map(CoveredComponent::to_item).collect(),
            params,
        }
    }

    /// Serialized `@signature-params` value.
    pub fn serialize(&self) -> Result<String, SageError> {
        self.to_inner_list().serialize()
    }

    /// Reconstruct parameters from a parsed `Signature-Input` member.
    pub fn from_inner_list(list: &InnerList) -> Result<Self, SageError> {
        let covered_components = list
            .items
            .iter()
            .map(CoveredComponent::from_item)
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Self { covered_components, ..Default::default() };
        for (key, value) in &list.params.0 {
            match (key.as_str(), value) {
                ("keyid", BareItem::String(s)) => out.key_id = Some(s.clone()),
                ("alg", BareItem::String(s)) => {
                    out.algorithm = Some(SignatureAlgorithm::parse(s)?)
                }
                ("created", BareItem::Integer(i)) => out.created = Some(*i),
                ("expires", BareItem::Integer(i)) => out.expires = Some(*i),
                ("nonce", BareItem::String(s)) => out.nonce = Some(s.clone()),
                (other, _) => {
                    return Err(SageError::InvalidArgument(format!(
                        "unknown or mistyped signature parameter {other:?}"
                    )))
                }
            }
        }
        Ok(out)
    }
}

/// Build the signature base for `msg` under `params`.
///
/// The base is one line per covered component, in declared order, followed by
/// the `@signature-params` line. Any missing component aborts with
/// `component-not-found`.
pub fn signature_base(
    msg: &SignableMessage,
    params: &SignatureInputParams,
) -> Result<String, SageError> {
    let mut seen: Vec<&CoveredComponent> = Vec::new();
    let mut base = String::new();
    for component in &params.covered_components {
        if seen.contains(&component) {
            return Err(SageError::InvalidArgument(format!(
                "duplicate covered component {component}"
            )));
        }
        seen.push(component);

        let value = component_value(msg, component)?;
        base.push_str(&component.to_string());
        base.push_str(": ");
        base.push_str(&value);
        base.push('\n');
    }
    base.push_str("\"@signature-params\": ");
    base.push_str(&params.serialize()?);
    Ok(base)
}

fn component_value(
    msg: &SignableMessage,
    component: &CoveredComponent,
) -> Result<String, SageError> {
    let missing = || SageError::ComponentNotFound(component.identifier.clone());
    match component.identifier.as_str() {
        "@method" => {
            if msg.method().is_empty() {
                return Err(missing());
            }
            Ok(msg.method().to_owned())
        }
        "@target-uri" => msg.target_uri().ok_or_else(missing),
        "@authority" => msg.authority().ok_or_else(missing),
        "@scheme" => {
            if msg.scheme().is_empty() {
                return Err(missing());
            }
            Ok(msg.scheme().to_owned())
        }
        "@request-target" => {
            if msg.method().is_empty() {
                return Err(missing());
            }
            let mut target = msg.path().to_owned();
            if let Some(q) = msg.query() {
                if !q.is_empty() {
                    target.push('?');
                    target.push_str(q);
                }
            }
            Ok(format!("{} {}", msg.method(), target))
        }
        "@path" => {
            if msg.is_response() {
                return Err(missing());
            }
            Ok(msg.path().to_owned())
        }
        "@query" => {
            if msg.is_response() {
                return Err(missing());
            }
            Ok(format!("?{}", msg.query().unwrap_or_default()))
        }
        "@query-param" => {
            let name = component.param_name.as_deref().ok_or_else(|| {
                SageError::InvalidArgument("@query-param requires a name parameter".into())
            })?;
            msg.query_param(name)
                .ok_or_else(|| SageError::ComponentNotFound(format!("@query-param;name={name}")))
        }
        "@status" => {
            let status = msg.status().ok_or_else(missing)?;
            Ok(status.to_string())
        }
        other if other.starts_with('@') => Err(SageError::InvalidArgument(format!(
            "unknown derived component {other}"
        ))),
        header => msg.header_joined(header).ok_or_else(missing),
    }
}
