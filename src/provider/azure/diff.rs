//! Desired-state diffing for Azure AD applications
//!
//! Each diff looks at one aspect of the remote application and returns the
//! patch fragment needed to bring it in line, or `None`. [`compute_patch`]
//! combines the fragments so a reconcile issues at most one PATCH.

use serde::Serialize;

use super::graph::{
    Application, OptionalClaim, OptionalClaims, RequiredResourceAccess, WebApplication,
};
use crate::connector::TenantAppConfig;

/// Claim every token type must carry
pub const GROUPS_CLAIM: &str = "groups";

/// Sign-in audience of tenant applications
pub const SIGN_IN_AUDIENCE: &str = "AzureADMyOrg";

/// Partial application update
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<WebApplication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional_claims: Option<OptionalClaims>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_resource_access: Option<Vec<RequiredResourceAccess>>,
}

impl ApplicationPatch {
    pub fn is_empty(&self) -> bool {
        self.web.is_none() && self.optional_claims.is_none() && self.required_resource_access.is_none()
    }
}

fn groups_claim() -> OptionalClaim {
    OptionalClaim {
        name: GROUPS_CLAIM.to_string(),
        essential: false,
        source: None,
        additional_properties: Vec::new(),
    }
}

/// Optional claims of a freshly created application
pub fn desired_optional_claims() -> OptionalClaims {
    OptionalClaims {
        access_token: vec![groups_claim()],
        id_token: vec![groups_claim()],
        saml2_token: vec![groups_claim()],
    }
}

/// Append the desired redirect URI when it is not registered yet.
///
/// Other callback URIs already registered on the application are kept.
pub fn redirect_uris_patch(current: &WebApplication, desired: &str) -> Option<WebApplication> {
    if current.redirect_uris.iter().any(|uri| uri == desired) {
        return None;
    }
    let mut redirect_uris = current.redirect_uris.clone();
    redirect_uris.push(desired.to_string());
    Some(WebApplication { redirect_uris })
}

/// Add the groups claim to every token type that lacks it.
///
/// Lists that already carry the claim are returned unchanged.
pub fn optional_claims_patch(current: Option<&OptionalClaims>) -> Option<OptionalClaims> {
    let mut claims = current.cloned().unwrap_or_default();
    let mut changed = false;

    for list in [
        &mut claims.access_token,
        &mut claims.id_token,
        &mut claims.saml2_token,
    ] {
        if !list.iter().any(|claim| claim.name == GROUPS_CLAIM) {
            list.push(groups_claim());
            changed = true;
        }
    }

    changed.then_some(claims)
}

/// Mirror the template's permissions. Any difference replaces the whole set.
pub fn required_resource_access_patch(
    current: &[RequiredResourceAccess],
    template: &[RequiredResourceAccess],
) -> Option<Vec<RequiredResourceAccess>> {
    (current != template).then(|| template.to_vec())
}

/// Combine every diff into a single patch, `None` when nothing differs.
pub fn compute_patch(
    current: &Application,
    tenant: &TenantAppConfig,
    template: &Application,
) -> Option<ApplicationPatch> {
    let patch = ApplicationPatch {
        web: redirect_uris_patch(&current.web, &tenant.redirect_uri),
        optional_claims: optional_claims_patch(current.optional_claims.as_ref()),
        required_resource_access: required_resource_access_patch(
            &current.required_resource_access,
            &template.required_resource_access,
        ),
    };

    (!patch.is_empty()).then_some(patch)
}

/// Application registration created for a tenant
pub fn desired_application(tenant: &TenantAppConfig, template: &Application) -> Application {
    Application {
        display_name: tenant.name.clone(),
        sign_in_audience: Some(SIGN_IN_AUDIENCE.to_string()),
        identifier_uris: if tenant.identifier_uri.is_empty() {
            Vec::new()
        } else {
            vec![tenant.identifier_uri.clone()]
        },
        web: WebApplication {
            redirect_uris: vec![tenant.redirect_uri.clone()],
        },
        optional_claims: Some(desired_optional_claims()),
        required_resource_access: template.required_resource_access.clone(),
        ..Default::default()
    }
}
