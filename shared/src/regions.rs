use crate::arns;

pub const AWS_REGION: &str = "AWS_REGION";
pub const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";

/// Environment lookup backed by the real process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Region from `AWS_REGION`, falling back to `AWS_DEFAULT_REGION`.
pub fn region_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    [AWS_REGION, AWS_DEFAULT_REGION]
        .into_iter()
        .filter_map(|name| lookup(name))
        .map(|region| region.trim().to_string())
        .find(|region| !region.is_empty())
}

/// Environment first, then the region embedded in the invoked function ARN.
pub fn resolve_region(
    lookup: impl Fn(&str) -> Option<String>,
    invoked_function_arn: Option<&str>,
) -> Option<String> {
    region_from_env(lookup).or_else(|| {
        invoked_function_arn
            .map(arns::region_of)
            .filter(|region| !region.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn prefers_aws_region() {
        let lookup = env(&[(AWS_REGION, "eu-west-1"), (AWS_DEFAULT_REGION, "us-east-1")]);
        assert_eq!(region_from_env(lookup).as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn blank_region_falls_through() {
        let lookup = env(&[(AWS_REGION, "  "), (AWS_DEFAULT_REGION, "us-east-1")]);
        assert_eq!(region_from_env(lookup).as_deref(), Some("us-east-1"));
    }

    #[test]
    fn falls_back_to_function_arn() {
        let arn = "arn:aws:lambda:ap-southeast-2:123456789012:function:f:prod";
        assert_eq!(resolve_region(env(&[]), Some(arn)).as_deref(), Some("ap-southeast-2"));
        assert_eq!(resolve_region(env(&[]), None), None);
    }
}
