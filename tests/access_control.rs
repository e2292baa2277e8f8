mod common;

use anyhow::Result;
use async_trait::async_trait;

use accesscontrol::authz::{AccessControl, AuthzMode, Evaluator, Principal, RegistryBuilder, ScopeAttributeResolver};
use accesscontrol::models::rbac::{PermissionSet, Subject};
use accesscontrol::{AppError, AppResult, Config, PermissionService, ResourcePermissionStore};

use common::{dashboard_command, setup_db};

/// Maps numeric team ids to the scopes grants are stored under.
struct TeamResolver;

#[async_trait]
impl ScopeAttributeResolver for TeamResolver {
    async fn resolve(&self, _org_id: i64, scope: &str) -> AppResult<Vec<String>> {
        match scope {
            "teams:id:1" => Ok(vec!["another:scope".to_string()]),
            "teams:id:2" => Err(AppError::internal("team service unavailable")),
            "teams:id:3" => Ok(vec![]),
            other => Err(AppError::not_found(format!("{other} does not exist"))),
        }
    }
}

fn access_control(mode: AuthzMode) -> Result<AccessControl> {
    let mut builder = RegistryBuilder::new();
    builder.register_scope_attribute_resolver("teams:id:", TeamResolver)?;
    let config = Config {
        mode,
        ..Config::default()
    };
    Ok(AccessControl::new(builder.freeze(), &config))
}

fn principal(grants: &[(&str, &str)]) -> Principal {
    let set: PermissionSet = grants.iter().copied().collect();
    Principal::user(1, 1).with_permissions(1, set)
}

#[tokio::test]
async fn wildcard_grant_covers_resource_but_not_other_actions() -> Result<()> {
    let ac = access_control(AuthzMode::Strict)?;
    let principal = principal(&[("teams:write", "teams:*")]);

    let team = Evaluator::permission("teams:write", ["teams:id:1"]);
    assert!(ac.evaluate(&principal, &team).await?);

    let users = Evaluator::permission("org.users:write", ["users:id:1"]);
    assert!(!ac.evaluate(&principal, &users).await?);

    Ok(())
}

#[tokio::test]
async fn resolver_rewrites_scope_only_when_plain_evaluation_fails() -> Result<()> {
    let ac = access_control(AuthzMode::Strict)?;
    let principal = principal(&[("teams:write", "another:scope")]);
    let eval = Evaluator::permission("teams:write", ["teams:id:1"]);

    let set = principal.permissions().cloned().unwrap_or_default();
    assert!(!eval.evaluate(&set), "unresolved evaluation must deny");
    assert!(ac.evaluate(&principal, &eval).await?, "resolved evaluation must allow");

    // unknown team: resolver reports not found, which is a deny
    let missing = Evaluator::permission("teams:write", ["teams:id:99"]);
    assert!(!ac.evaluate(&principal, &missing).await?);

    Ok(())
}

#[tokio::test]
async fn resolver_returning_no_scopes_denies() -> Result<()> {
    let ac = access_control(AuthzMode::Strict)?;
    let principal = principal(&[("teams:write", "teams:id:5")]);

    let eval = Evaluator::permission("teams:write", ["teams:id:3"]);
    assert!(!ac.evaluate(&principal, &eval).await?);

    let err = ac.require(&principal, &eval).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    Ok(())
}

#[tokio::test]
async fn resolver_failure_is_an_error_not_a_deny() -> Result<()> {
    let principal = principal(&[("teams:write", "another:scope")]);
    let eval = Evaluator::permission("teams:write", ["teams:id:2"]);

    let err = access_control(AuthzMode::Strict)?
        .evaluate(&principal, &eval)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Resolution(_)));

    let err = access_control(AuthzMode::Advisory)?
        .require(&principal, &eval)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Resolution(_)));

    assert!(access_control(AuthzMode::Off)?.require(&principal, &eval).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn combinator_edge_cases() -> Result<()> {
    let ac = access_control(AuthzMode::Strict)?;
    let principal = principal(&[("dashboards:read", "dashboards:uid:1")]);

    assert!(!ac.evaluate(&principal, &Evaluator::Any(vec![])).await?);
    assert!(ac.evaluate(&principal, &Evaluator::All(vec![])).await?);
    assert!(ac.evaluate(&principal, &Evaluator::action("dashboards:read")).await?);
    assert!(!ac.evaluate(&principal, &Evaluator::action("dashboards:write")).await?);

    let mixed = Evaluator::all([
        Evaluator::permission("dashboards:read", ["dashboards:uid:1"]),
        Evaluator::any([
            Evaluator::action("dashboards:write"),
            Evaluator::permission("dashboards:read", ["dashboards:uid:2", "dashboards:uid:1"]),
        ]),
    ]);
    assert!(ac.evaluate(&principal, &mixed).await?);

    Ok(())
}

#[tokio::test]
async fn stored_grants_flow_into_checks() -> Result<()> {
    let (_dir, pool) = setup_db().await?;
    let store = ResourcePermissionStore::new(pool);
    let config = Config::default();
    let service = PermissionService::new(store.clone(), &config);
    let ac = AccessControl::new(RegistryBuilder::new().freeze(), &config);

    store
        .set_resource_permission(1, &Subject::User(7), &dashboard_command("a", &["dashboards:read", "dashboards:write"]), None)
        .await?;
    store
        .set_resource_permission(1, &Subject::Team(3), &dashboard_command("b", &["dashboards:read"]), None)
        .await?;

    let mut principal = Principal::user(7, 1);
    service.load(&mut principal, &[3], &[], false).await?;

    assert!(
        ac.evaluate(&principal, &Evaluator::permission("dashboards:write", ["dashboards:uid:a"]))
            .await?
    );
    assert!(
        !ac.evaluate(&principal, &Evaluator::permission("dashboards:write", ["dashboards:uid:b"]))
            .await?
    );

    let can_read = ac.checker(&principal, "dashboards:read", &["dashboards:uid:"]);
    let visible: Vec<&str> = ["a", "b", "c"]
        .into_iter()
        .filter(|uid| can_read(&format!("dashboards:uid:{uid}")))
        .collect();
    assert_eq!(visible, vec!["a", "b"]);

    let annotated = ac.resources_metadata(&principal, "dashboards:uid:", ["a", "b", "c"]);
    assert_eq!(annotated.len(), 2);
    assert_eq!(annotated["a"].len(), 2);
    assert_eq!(annotated["b"].get("dashboards:read"), Some(&true));

    // the same principal in another org has nothing loaded
    let elsewhere = Principal::user(7, 2);
    assert!(!ac.evaluate(&elsewhere, &Evaluator::action("dashboards:read")).await?);

    Ok(())
}
