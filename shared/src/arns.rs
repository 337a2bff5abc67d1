//! ARN parsing helpers.
//!
//! `arn:partition:service:region:account-id:resource`, where the resource part
//! may be `type/name[/...]`, `type:name[:qualifier]` or a bare name.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArnError {
    #[error("Invalid ARN ({0}): expected arn:partition:service:region:account:resource")]
    Invalid(String),
}

/// The six top-level components of an ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnParts {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl ArnParts {
    pub fn parse(arn: &str) -> Result<Self, ArnError> {
        let parts: Vec<&str> = arn.splitn(6, ':').collect();
        match parts.as_slice() {
            ["arn", partition, service, region, account_id, resource] => Ok(Self {
                partition: partition.to_string(),
                service: service.to_string(),
                region: region.to_string(),
                account_id: account_id.to_string(),
                resource: resource.to_string(),
            }),
            _ => Err(ArnError::Invalid(arn.to_string())),
        }
    }

    pub fn resources(&self) -> ArnResources {
        ArnResources::parse(&self.resource)
    }
}

/// The resource portion of an ARN broken into its pieces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArnResources {
    pub resource_type: String,
    pub resource: String,
    /// Trailing qualifiers, e.g. a Lambda alias/version or the
    /// `stream/<label>` suffix of a DynamoDB stream ARN.
    pub qualifiers: Vec<String>,
}

impl ArnResources {
    pub fn parse(resource: &str) -> Self {
        // Slash form wins when present before any colon (e.g. "table/x/stream/y")
        let slash = resource.find('/');
        let colon = resource.find(':');
        let separator = match (slash, colon) {
            (Some(s), Some(c)) if s < c => '/',
            (Some(_), None) => '/',
            (_, Some(_)) => ':',
            (None, None) => {
                return Self {
                    resource: resource.to_string(),
                    ..Default::default()
                }
            }
        };

        let mut pieces = resource.split(separator).map(str::to_string);
        let resource_type = pieces.next().unwrap_or_default();
        let name = pieces.next().unwrap_or_default();
        Self {
            resource_type,
            resource: name,
            qualifiers: pieces.collect(),
        }
    }

    /// Lambda alias or version qualifier, if any.
    pub fn alias_or_version(&self) -> Option<&str> {
        self.qualifiers
            .first()
            .map(String::as_str)
            .filter(|q| !q.is_empty())
    }

    /// The qualifier, unless it is a version number or `$LATEST`.
    pub fn alias(&self) -> Option<&str> {
        self.alias_or_version().filter(|q| !is_version_qualifier(q))
    }
}

pub fn is_version_qualifier(qualifier: &str) -> bool {
    qualifier == "$LATEST" || (!qualifier.is_empty() && qualifier.bytes().all(|b| b.is_ascii_digit()))
}

/// The n-th `:`-separated component of the ARN, or `""` if it does not exist.
pub fn arn_component(arn: &str, index: usize) -> &str {
    if index >= 5 {
        // The resource may itself contain colons
        return arn.splitn(6, ':').nth(5).map_or("", |resource| {
            if index == 5 {
                resource
            } else {
                resource.split(':').nth(index - 5).unwrap_or("")
            }
        });
    }
    arn.split(':').nth(index).unwrap_or("")
}

pub fn service_of(arn: &str) -> &str {
    arn_component(arn, 2)
}

pub fn region_of(arn: &str) -> &str {
    arn_component(arn, 3)
}

pub fn account_of(arn: &str) -> &str {
    arn_component(arn, 4)
}

pub fn arn_resources(arn: &str) -> ArnResources {
    ArnResources::parse(arn_component(arn, 5))
}
