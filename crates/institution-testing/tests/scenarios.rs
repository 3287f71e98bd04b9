//! End-to-end scenarios over fixtures and the fake platform.

use institution_core::{
    AccessContext, DeletePolicy, InstitutionError, InstitutionId, InstitutionScope, Limit,
    NewInstitution, UserId,
};
use institution_testing::{services, Fixtures, InstitutionProperties, UserProperties};

#[tokio::test]
async fn test_restricted_manager_is_scoped_to_their_institution() {
    for (backend, service) in services(DeletePolicy::Restrict).unwrap() {
        let (acme, _) = service
            .create_institution_with_manager(
                NewInstitution::new("Acme", Limit::Max(10), Limit::Max(10)),
                UserId(42),
            )
            .await
            .unwrap();

        let scoped = service
            .access()
            .resolve_managed_institution(&AccessContext::restricted(UserId(42)))
            .await
            .unwrap();
        assert_eq!(scoped, acme.id, "{backend}");

        assert_eq!(service.quota().user_count(acme.id).await.unwrap(), 1, "{backend}");
        assert!(service.quota().can_add_user(acme.id).await.unwrap(), "{backend}");
    }
}

#[tokio::test]
async fn test_unrestricted_manager_is_unscoped() {
    for (backend, service) in services(DeletePolicy::Restrict).unwrap() {
        service
            .create_institution_with_manager(
                NewInstitution::new("Acme", Limit::Max(10), Limit::Max(10)),
                UserId(42),
            )
            .await
            .unwrap();

        let ctx = AccessContext::unrestricted(UserId(42));
        let scoped = service
            .access()
            .resolve_managed_institution(&ctx)
            .await
            .unwrap();
        assert_eq!(scoped, InstitutionId::UNSCOPED, "{backend}");
        assert_eq!(
            service.access().resolve_scope(&ctx).await.unwrap(),
            InstitutionScope::Unscoped,
            "{backend}"
        );
    }
}

#[tokio::test]
async fn test_restricted_user_without_managed_institution_is_unscoped() {
    for (backend, service) in services(DeletePolicy::Restrict).unwrap() {
        let inst = service
            .create_institution("Plain", None, None)
            .await
            .unwrap();
        service.enroll_user(UserId(7), inst.id).await.unwrap();

        let scoped = service
            .access()
            .resolve_managed_institution(&AccessContext::restricted(UserId(7)))
            .await
            .unwrap();
        assert!(scoped.is_unscoped(), "{backend}");
    }
}

#[tokio::test]
async fn test_institutional_manager_fixture_resolves() {
    let fixtures = Fixtures::new();
    let institution = fixtures
        .create_institution(InstitutionProperties::default())
        .await
        .unwrap();
    let manager = fixtures
        .new_institutional_manager(&institution, UserProperties::default())
        .await
        .unwrap();

    let scoped = fixtures
        .service()
        .access()
        .resolve_for_user(manager, fixtures.platform())
        .await
        .unwrap();
    assert_eq!(scoped, institution.id);

    // Dropping the manager from the network-manager list lifts the scope.
    fixtures.platform().remove_network_manager(manager).await;
    let scoped = fixtures
        .service()
        .access()
        .resolve_for_user(manager, fixtures.platform())
        .await
        .unwrap();
    assert!(scoped.is_unscoped());
}

#[tokio::test]
async fn test_institutional_manager_fixture_on_sqlite() {
    let fixtures = Fixtures::sqlite(DeletePolicy::Restrict).unwrap();
    let institution = fixtures
        .create_institution(InstitutionProperties::named("Sqlite U"))
        .await
        .unwrap();
    let manager = fixtures
        .new_institutional_manager(&institution, UserProperties::default())
        .await
        .unwrap();

    let ctx = fixtures.access_context(manager).await.unwrap();
    assert_eq!(
        fixtures.service().access().resolve_scope(&ctx).await.unwrap(),
        InstitutionScope::Institution(institution.id)
    );
}

#[tokio::test]
async fn test_bulk_fixtures_distribute_every_user() {
    let fixtures = Fixtures::new();
    let institutions = fixtures.create_institutions_users(3, 7).await.unwrap();

    assert_eq!(institutions.len(), 3);
    for (i, institution) in institutions.iter().enumerate() {
        assert_eq!(institution.name, format!("Institution {}", i));
    }

    let mut total = 0;
    for institution in &institutions {
        total += fixtures
            .service()
            .memberships()
            .count_by_institution(institution.id)
            .await
            .unwrap();
    }
    assert_eq!(total, 7);
    assert_eq!(fixtures.platform().user_count().await, 7);
    assert!(fixtures.platform().user_by_login("johndoe6").await.is_some());
}

#[tokio::test]
async fn test_fixtures_are_isolated() {
    let first = Fixtures::new();
    first
        .create_institution(InstitutionProperties::default())
        .await
        .unwrap();

    let second = Fixtures::new();
    assert!(second.service().institutions().list().await.unwrap().is_empty());
    assert_eq!(second.platform().user_count().await, 0);
}

#[tokio::test]
async fn test_user_quota_never_exceeded() {
    for (backend, service) in services(DeletePolicy::Restrict).unwrap() {
        let inst = service
            .create_institution("Small", None, Some(Limit::Max(3)))
            .await
            .unwrap();

        let mut rejected = 0;
        for user in 1..=5 {
            match service.enroll_user(UserId(user), inst.id).await {
                Ok(_) => {}
                Err(InstitutionError::QuotaExceeded { resource, limit }) => {
                    assert_eq!(resource, "users", "{backend}");
                    assert_eq!(limit, 3, "{backend}");
                    rejected += 1;
                }
                Err(other) => panic!("{backend}: unexpected error {other}"),
            }
        }

        let usage = service.quota().usage(inst.id).await.unwrap();
        assert_eq!(rejected, 2, "{backend}");
        assert_eq!(usage.user_count, 3, "{backend}");
        assert_eq!(usage.remaining_users(), Some(0), "{backend}");
        assert!(!usage.can_add_user(), "{backend}");
    }
}

#[tokio::test]
async fn test_unlimited_institution_always_accepts() {
    for (backend, service) in services(DeletePolicy::Restrict).unwrap() {
        let inst = service
            .create_institution("Open", Some(Limit::Unlimited), Some(Limit::Unlimited))
            .await
            .unwrap();
        for user in 1..=25 {
            service.enroll_user(UserId(user), inst.id).await.unwrap();
        }
        let usage = service.quota().usage(inst.id).await.unwrap();
        assert!(usage.can_add_user(), "{backend}");
        assert_eq!(usage.remaining_users(), None, "{backend}");
    }
}

#[tokio::test]
async fn test_quota_on_missing_institution() {
    for (backend, service) in services(DeletePolicy::Restrict).unwrap() {
        let err = service
            .quota()
            .can_add_book(InstitutionId::new(12))
            .await
            .unwrap_err();
        assert!(matches!(err, InstitutionError::NotFound { .. }), "{backend}");
    }
}

#[tokio::test]
async fn test_summaries_serialize_for_admin_listing() {
    let fixtures = Fixtures::new();
    let institutions = fixtures.create_institutions_users(2, 0).await.unwrap();
    fixtures
        .service()
        .institutions()
        .update(
            institutions[1].id,
            institution_core::InstitutionUpdate::default().user_limit(Limit::Unlimited),
        )
        .await
        .unwrap();

    let summaries = fixtures.service().summaries().await.unwrap();
    let json = serde_json::to_value(&summaries).unwrap();

    assert_eq!(json[0]["name"], "Institution 0");
    assert_eq!(json[0]["user_limit"], 10);
    assert_eq!(json[0]["user_count"], 0);
    assert!(json[1]["user_limit"].is_null());
}
