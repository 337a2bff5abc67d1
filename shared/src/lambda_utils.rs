use aws_sdk_lambda::{
    operation::update_event_source_mapping::UpdateEventSourceMappingOutput,
    types::EventSourceMappingConfiguration, Client as LambdaClient,
};
use thiserror::Error;

use crate::contexts::RuntimeInfo;

#[derive(Debug, Error)]
pub enum LambdaError {
    #[error("Failed to list event source mappings for {function_name}: {source}")]
    ListEventSourceMappings {
        function_name: String,
        #[source]
        source: aws_sdk_lambda::Error,
    },
    #[error("Failed to update event source mapping {uuid}: {source}")]
    UpdateEventSourceMapping {
        uuid: String,
        #[source]
        source: aws_sdk_lambda::Error,
    },
}

/// All event source mappings of a function, optionally for one source only.
pub async fn list_event_source_mappings(
    client: &LambdaClient,
    function_name: &str,
    event_source_arn: Option<&str>,
) -> Result<Vec<EventSourceMappingConfiguration>, LambdaError> {
    let mut mappings = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let page = client
            .list_event_source_mappings()
            .function_name(function_name)
            .set_event_source_arn(event_source_arn.map(str::to_string))
            .set_marker(marker.take())
            .send()
            .await
            .map_err(|e| LambdaError::ListEventSourceMappings {
                function_name: function_name.to_string(),
                source: e.into(),
            })?;

        mappings.extend(page.event_source_mappings().iter().cloned());

        match page.next_marker() {
            Some(next) if !next.is_empty() => marker = Some(next.to_string()),
            _ => break,
        }
    }

    tracing::info!(
        "Found {} event source mapping(s) for {}",
        mappings.len(),
        function_name
    );
    Ok(mappings)
}

/// Fields of an event source mapping that may be changed. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingUpdate {
    pub function_name: Option<String>,
    pub enabled: Option<bool>,
    pub batch_size: Option<i32>,
}

pub async fn update_event_source_mapping(
    client: &LambdaClient,
    uuid: &str,
    update: MappingUpdate,
) -> Result<UpdateEventSourceMappingOutput, LambdaError> {
    tracing::info!("Updating event source mapping {} with {:?}", uuid, update);

    client
        .update_event_source_mapping()
        .uuid(uuid)
        .set_function_name(update.function_name)
        .set_enabled(update.enabled)
        .set_batch_size(update.batch_size)
        .send()
        .await
        .map_err(|e| LambdaError::UpdateEventSourceMapping {
            uuid: uuid.to_string(),
            source: e.into(),
        })
}

pub async fn enable_event_source_mapping(
    client: &LambdaClient,
    uuid: &str,
) -> Result<UpdateEventSourceMappingOutput, LambdaError> {
    let update = MappingUpdate {
        enabled: Some(true),
        ..Default::default()
    };
    update_event_source_mapping(client, uuid, update).await
}

pub async fn disable_event_source_mapping(
    client: &LambdaClient,
    uuid: &str,
) -> Result<UpdateEventSourceMappingOutput, LambdaError> {
    let update = MappingUpdate {
        enabled: Some(false),
        ..Default::default()
    };
    update_event_source_mapping(client, uuid, update).await
}

/// The invoked function's name and alias (if it was invoked through one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokedLambda {
    pub function_name: String,
    pub alias: Option<String>,
}

impl InvokedLambda {
    /// `name:alias`, or just `name` when unqualified.
    pub fn name_with_alias(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}:{}", self.function_name, alias),
            None => self.function_name.clone(),
        }
    }
}

pub fn invoked_lambda(runtime: &RuntimeInfo) -> InvokedLambda {
    let resources = crate::arns::arn_resources(&runtime.invoked_function_arn);
    let function_name = if resources.resource.is_empty() {
        runtime.function_name.clone()
    } else {
        resources.resource.clone()
    };
    InvokedLambda {
        function_name,
        alias: runtime.alias(),
    }
}

pub fn invoked_function_name_with_alias(runtime: &RuntimeInfo) -> String {
    invoked_lambda(runtime).name_with_alias()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_invocations_carry_the_alias() {
        let runtime = RuntimeInfo {
            invoked_function_arn: "arn:aws:lambda:eu-west-1:123456789012:function:orders-consumer:prod".to_string(),
            function_name: "orders-consumer".to_string(),
            ..Default::default()
        };
        let invoked = invoked_lambda(&runtime);
        assert_eq!(invoked.function_name, "orders-consumer");
        assert_eq!(invoked.alias.as_deref(), Some("prod"));
        assert_eq!(invoked_function_name_with_alias(&runtime), "orders-consumer:prod");
    }

    #[test]
    fn unqualified_invocations_use_the_bare_name() {
        let runtime = RuntimeInfo {
            invoked_function_arn: "arn:aws:lambda:eu-west-1:123456789012:function:orders-consumer".to_string(),
            ..Default::default()
        };
        assert_eq!(invoked_function_name_with_alias(&runtime), "orders-consumer");

        let local = RuntimeInfo {
            function_name: "local-fn".to_string(),
            ..Default::default()
        };
        assert_eq!(invoked_function_name_with_alias(&local), "local-fn");
    }

    #[test]
    fn version_qualified_invocations_have_no_alias() {
        let runtime = RuntimeInfo {
            invoked_function_arn: "arn:aws:lambda:eu-west-1:123456789012:function:orders-consumer:12".to_string(),
            ..Default::default()
        };
        assert_eq!(invoked_lambda(&runtime).alias, None);
        assert_eq!(invoked_function_name_with_alias(&runtime), "orders-consumer");
    }
}
