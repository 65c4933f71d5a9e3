// ABOUTME: Canonical naming for sandboxes derived from a project's name and owner
// ABOUTME: Produces the container name, public hostname and image tag, rejecting empty results

use crate::error::{HostingError, Result};
use crate::types::SandboxIdentity;

/// Longest DNS label we will emit
const MAX_LABEL_LEN: usize = 63;

/// Longest full hostname we will emit
const MAX_HOSTNAME_LEN: usize = 253;

/// Names derived for one (logical name, owner) pair.
///
/// Every derived name is a function of the identity alone and distinct
/// identities never share a container name or hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedNames {
    pub identity: SandboxIdentity,
    pub container_name: String,
    pub public_hostname: String,
    pub image_tag: String,
}

/// Lower-case, map everything outside `[a-z0-9]` to `_` and collapse runs of
/// separators, trimming them from both ends
fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

/// DNS label for a sanitized component. Labels are never truncated, so two
/// identities cannot end up behind one hostname.
fn component_label(component: &str, what: &str, raw: &str) -> Result<String> {
    let label = component.replace('_', "-");
    if label.len() > MAX_LABEL_LEN {
        return Err(HostingError::InvalidName(format!(
            "{} '{}' is longer than {} characters after sanitization",
            what, raw, MAX_LABEL_LEN
        )));
    }
    Ok(label)
}

/// Derive every name a sandbox needs. Fails with `InvalidName` when either part
/// sanitizes down to nothing or does not fit in a DNS label.
pub fn derive_names(logical_name: &str, owner_key: &str, base_domain: &str) -> Result<DerivedNames> {
    let name = sanitize_component(logical_name);
    if name.is_empty() {
        return Err(HostingError::InvalidName(format!(
            "project name '{}' is empty after sanitization",
            logical_name
        )));
    }

    let owner = sanitize_component(owner_key);
    if owner.is_empty() {
        return Err(HostingError::InvalidName(format!(
            "owner '{}' is empty after sanitization",
            owner_key
        )));
    }

    let name_label = component_label(&name, "project name", logical_name)?;
    let owner_label = component_label(&owner, "owner", owner_key)?;

    let domain = base_domain.trim().trim_matches('.').to_lowercase();
    if domain.is_empty() {
        return Err(HostingError::InvalidName("base domain is empty".to_string()));
    }

    let public_hostname = format!("{}.{}.{}", name_label, owner_label, domain);
    if public_hostname.len() > MAX_HOSTNAME_LEN {
        return Err(HostingError::InvalidName(format!(
            "hostname for '{}.{}' is longer than {} characters",
            logical_name, owner_key, MAX_HOSTNAME_LEN
        )));
    }

    // Components never contain '-', so the separator keeps the pair unambiguous
    let container_name = format!("{}-{}", name, owner);
    Ok(DerivedNames {
        identity: SandboxIdentity {
            logical_name: name,
            owner_key: owner,
        },
        public_hostname,
        image_tag: format!("hosting-{}", container_name),
        container_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_derive_names_basic() {
        let names = derive_names("Blog", "Alice", "localhost").unwrap();
        assert_eq!(
            names,
            DerivedNames {
                identity: SandboxIdentity {
                    logical_name: "blog".to_string(),
                    owner_key: "alice".to_string(),
                },
                container_name: "blog-alice".to_string(),
                public_hostname: "blog.alice.localhost".to_string(),
                image_tag: "hosting-blog-alice".to_string(),
            }
        );
    }

    #[rstest]
    #[case("My App", "bob", "my_app-bob", "my-app.bob.localhost")]
    #[case("site.v2", "jane.doe", "site_v2-jane_doe", "site-v2.jane-doe.localhost")]
    #[case("--api--", "Team_7", "api-team_7", "api.team-7.localhost")]
    #[case("café", "x", "caf-x", "caf.x.localhost")]
    #[case("a...b", "x", "a_b-x", "a-b.x.localhost")]
    fn test_derive_names_sanitizes(
        #[case] name: &str,
        #[case] owner: &str,
        #[case] container: &str,
        #[case] hostname: &str,
    ) {
        let names = derive_names(name, owner, "localhost").unwrap();
        assert_eq!(names.container_name, container);
        assert_eq!(names.public_hostname, hostname);
    }

    #[rstest]
    #[case("", "alice")]
    #[case("!!!", "alice")]
    #[case("blog", "   ")]
    #[case("___", "alice")]
    fn test_derive_names_rejects_empty(#[case] name: &str, #[case] owner: &str) {
        let err = derive_names(name, owner, "localhost").unwrap_err();
        assert!(matches!(err, HostingError::InvalidName(_)));
    }

    #[test]
    fn test_equivalent_names_share_identity() {
        let a = derive_names("my app", "Bob", "localhost").unwrap();
        let b = derive_names("My_App", "bob", "localhost").unwrap();
        assert_eq!(a.identity, b.identity);
    }

    #[test]
    fn test_split_point_changes_every_name() {
        let a = derive_names("a_b", "c", "localhost").unwrap();
        let b = derive_names("a", "b_c", "localhost").unwrap();

        assert_ne!(a.identity, b.identity);
        assert_ne!(a.container_name, b.container_name);
        assert_ne!(a.image_tag, b.image_tag);
        assert_ne!(a.public_hostname, b.public_hostname);
    }

    #[test]
    fn test_longest_label_is_accepted() {
        let name = "a".repeat(MAX_LABEL_LEN);
        let names = derive_names(&name, "bob", "apps.example.com").unwrap();
        assert_eq!(
            names.public_hostname,
            format!("{}.bob.apps.example.com", name)
        );
    }

    #[rstest]
    #[case(format!("{}x", "a".repeat(MAX_LABEL_LEN)), "bob".to_string())]
    #[case("blog".to_string(), "o".repeat(MAX_LABEL_LEN + 1))]
    fn test_over_long_labels_are_rejected(#[case] name: String, #[case] owner: String) {
        let err = derive_names(&name, &owner, "localhost").unwrap_err();
        assert!(matches!(err, HostingError::InvalidName(_)));
    }

    #[test]
    fn test_over_long_hostname_is_rejected() {
        let domain = format!("{}.example.com", "d".repeat(200));
        let err = derive_names(&"a".repeat(40), "bob", &domain).unwrap_err();
        assert!(matches!(err, HostingError::InvalidName(_)));
    }
}
