//! Integration tests for the HMAC key registry, secret store, access
//! mediator, sharing rules, and audit log (C2–C6) against a migrated
//! Postgres database.
//!
//! Each test gets its own database, created and migrated by
//! `#[sqlx::test]` from `vaultify-server/migrations` before the test body
//! runs and torn down afterward.

#![allow(clippy::unwrap_used)]

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use vaultify_core::access::{AccessMediator, Principal};
use vaultify_core::audit::{AuditEvent, AuditFilter, AuditLog};
use vaultify_core::hmac_keys::HmacKeyRegistry;
use vaultify_core::models::{action, AccessMode, Permission};
use vaultify_core::secret_store::SecretStore;
use vaultify_core::sharing::SharingRuleStore;
use vaultify_core::user::{hash_password, UserStore};

async fn seed_user(pool: &PgPool, email: &str) -> Uuid {
    let users = UserStore::new(pool.clone());
    let hash = hash_password("correct horse battery staple").unwrap();
    let user = users.create(email, "Test User", &hash).await.unwrap();
    user.id
}

async fn seed_hmac_key(pool: &PgPool) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO hmac_keys (key_bytes, is_active) VALUES ($1, true) RETURNING id",
    )
    .bind(vec![0u8; 32])
    .fetch_one(pool)
    .await
    .unwrap()
}

fn noop_audit(user_id: Uuid, email: &str, path: &str) -> AuditEvent<'_> {
    AuditEvent {
        user_id,
        user_email: email,
        action: action::CREATE_SECRET,
        resource_path: path,
        resource_version: None,
        success: true,
        reason: None,
    }
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn create_then_read_latest_and_pinned_version(pool: PgPool) {
    let secrets = SecretStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let key = seed_hmac_key(&pool).await;

    let v1 = secrets
        .create_secret_with_version(
            owner,
            "team/db-password",
            b"ciphertext-v1",
            b"nonce-v1-2345678901234",
            b"sig-v1",
            key,
            None,
            noop_audit(owner, "owner@example.com", "team/db-password"),
        )
        .await
        .unwrap();
    assert_eq!(v1.version, 1);

    let latest = secrets.get_latest("team/db-password").await.unwrap();
    assert_eq!(latest.version, 1);
    assert_eq!(latest.ciphertext, b"ciphertext-v1");
    assert_eq!(latest.owner_id, owner);

    let pinned = secrets.get_version("team/db-password", 1).await.unwrap();
    assert_eq!(pinned.id, v1.id);
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn new_versions_are_gap_free_and_monotonic(pool: PgPool) {
    let secrets = SecretStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let key = seed_hmac_key(&pool).await;

    secrets
        .create_secret_with_version(
            owner,
            "team/api-key",
            b"v1",
            b"nonce-v1-2345678901234",
            b"sig1",
            key,
            None,
            noop_audit(owner, "owner@example.com", "team/api-key"),
        )
        .await
        .unwrap();

    let v2 = secrets
        .create_new_version(
            "team/api-key",
            b"v2",
            b"nonce-v2-2345678901234",
            b"sig2",
            key,
            owner,
            noop_audit(owner, "owner@example.com", "team/api-key"),
        )
        .await
        .unwrap();
    assert_eq!(v2.version, 2);

    let v3 = secrets
        .create_new_version(
            "team/api-key",
            b"v3",
            b"nonce-v3-2345678901234",
            b"sig3",
            key,
            owner,
            noop_audit(owner, "owner@example.com", "team/api-key"),
        )
        .await
        .unwrap();
    assert_eq!(v3.version, 3);

    let all = secrets.get_all_versions("team/api-key").await.unwrap();
    let mut versions: Vec<i32> = all.iter().map(|v| v.version).collect();
    versions.sort_unstable();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn create_new_version_on_missing_path_is_not_found(pool: PgPool) {
    let secrets = SecretStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let key = seed_hmac_key(&pool).await;

    let err = secrets
        .create_new_version(
            "does/not/exist",
            b"v1",
            b"nonce-v1-2345678901234",
            b"sig1",
            key,
            owner,
            noop_audit(owner, "owner@example.com", "does/not/exist"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, vaultify_core::error::CoreError::NotFound(_)));
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn delete_expired_removes_only_past_expiry(pool: PgPool) {
    let secrets = SecretStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let key = seed_hmac_key(&pool).await;

    secrets
        .create_secret_with_version(
            owner,
            "expired/secret",
            b"v1",
            b"nonce-v1-2345678901234",
            b"sig1",
            key,
            Some(Utc::now() - Duration::hours(1)),
            noop_audit(owner, "owner@example.com", "expired/secret"),
        )
        .await
        .unwrap();

    secrets
        .create_secret_with_version(
            owner,
            "live/secret",
            b"v1",
            b"nonce-v1-2345678901234",
            b"sig1",
            key,
            Some(Utc::now() + Duration::hours(1)),
            noop_audit(owner, "owner@example.com", "live/secret"),
        )
        .await
        .unwrap();

    let deleted = secrets.delete_expired().await.unwrap();
    assert_eq!(deleted, 1);

    assert!(secrets.get_latest("expired/secret").await.is_err());
    assert!(secrets.get_latest("live/secret").await.is_ok());
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn owner_is_authorized_without_a_sharing_rule(pool: PgPool) {
    let secrets = SecretStore::new(pool.clone());
    let sharing = SharingRuleStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let key = seed_hmac_key(&pool).await;

    secrets
        .create_secret_with_version(
            owner,
            "team/secret",
            b"v1",
            b"nonce-v1-2345678901234",
            b"sig1",
            key,
            None,
            noop_audit(owner, "owner@example.com", "team/secret"),
        )
        .await
        .unwrap();

    let mediator = AccessMediator::new(&secrets, &sharing);
    let grant = mediator
        .authorize(
            Principal {
                user_id: owner,
                email: "owner@example.com",
            },
            "team/secret",
            None,
            AccessMode::Write,
        )
        .await
        .unwrap();
    assert_eq!(grant.version.owner_id, owner);
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn stranger_without_a_grant_is_forbidden(pool: PgPool) {
    let secrets = SecretStore::new(pool.clone());
    let sharing = SharingRuleStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let stranger = seed_user(&pool, "stranger@example.com").await;
    let key = seed_hmac_key(&pool).await;

    secrets
        .create_secret_with_version(
            owner,
            "team/secret",
            b"v1",
            b"nonce-v1-2345678901234",
            b"sig1",
            key,
            None,
            noop_audit(owner, "owner@example.com", "team/secret"),
        )
        .await
        .unwrap();

    let mediator = AccessMediator::new(&secrets, &sharing);
    let err = mediator
        .authorize(
            Principal {
                user_id: stranger,
                email: "stranger@example.com",
            },
            "team/secret",
            None,
            AccessMode::Read,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, vaultify_core::error::CoreError::Forbidden(_)));
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn read_only_grant_forbids_write(pool: PgPool) {
    let secrets = SecretStore::new(pool.clone());
    let sharing = SharingRuleStore::new(pool.clone());
    let audit = AuditLog::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let reader = seed_user(&pool, "reader@example.com").await;
    let key = seed_hmac_key(&pool).await;

    secrets
        .create_secret_with_version(
            owner,
            "team/secret",
            b"v1",
            b"nonce-v1-2345678901234",
            b"sig1",
            key,
            None,
            noop_audit(owner, "owner@example.com", "team/secret"),
        )
        .await
        .unwrap();

    sharing
        .share(
            "owner@example.com",
            "reader@example.com",
            "team/secret",
            Permission::Read,
            None,
            AuditEvent {
                user_id: owner,
                user_email: "owner@example.com",
                action: action::SHARE_SECRET,
                resource_path: "team/secret",
                resource_version: None,
                success: true,
                reason: None,
            },
        )
        .await
        .unwrap();

    let mediator = AccessMediator::new(&secrets, &sharing);
    let reader_principal = Principal {
        user_id: reader,
        email: "reader@example.com",
    };

    mediator
        .authorize(reader_principal, "team/secret", None, AccessMode::Read)
        .await
        .unwrap();

    let err = mediator
        .authorize(reader_principal, "team/secret", None, AccessMode::Write)
        .await
        .unwrap_err();
    assert!(matches!(err, vaultify_core::error::CoreError::Forbidden(_)));

    // Confirm the store itself, not just the mediator, agrees.
    let perm = sharing
        .get_permission("team/secret", "reader@example.com")
        .await
        .unwrap();
    assert_eq!(perm, Permission::Read);
    let _ = audit;
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn sharing_the_same_path_twice_to_the_same_target_conflicts(pool: PgPool) {
    let sharing = SharingRuleStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let target = seed_user(&pool, "target@example.com").await;
    let _ = target;

    let event = || AuditEvent {
        user_id: owner,
        user_email: "owner@example.com",
        action: action::SHARE_SECRET,
        resource_path: "team/secret",
        resource_version: None,
        success: true,
        reason: None,
    };

    sharing
        .share(
            "owner@example.com",
            "target@example.com",
            "team/secret",
            Permission::Read,
            None,
            event(),
        )
        .await
        .unwrap();

    let err = sharing
        .share(
            "owner@example.com",
            "target@example.com",
            "team/secret",
            Permission::Write,
            None,
            event(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, vaultify_core::error::CoreError::Conflict(_)));
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn expired_sharing_rule_grants_nothing(pool: PgPool) {
    let sharing = SharingRuleStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let target = seed_user(&pool, "target@example.com").await;
    let _ = target;

    sharing
        .share(
            "owner@example.com",
            "target@example.com",
            "team/secret",
            Permission::Read,
            Some(Utc::now() - Duration::minutes(1)),
            AuditEvent {
                user_id: owner,
                user_email: "owner@example.com",
                action: action::SHARE_SECRET,
                resource_path: "team/secret",
                resource_version: None,
                success: true,
                reason: None,
            },
        )
        .await
        .unwrap();

    assert!(!sharing
        .check_shared("team/secret", "target@example.com")
        .await
        .unwrap());
    assert!(sharing
        .get_permission("team/secret", "target@example.com")
        .await
        .is_err());
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn delete_expired_sharing_rules_only_removes_past_ones(pool: PgPool) {
    let sharing = SharingRuleStore::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    seed_user(&pool, "expired-target@example.com").await;
    seed_user(&pool, "live-target@example.com").await;

    let share_event = |resource_path: &'static str| AuditEvent {
        user_id: owner,
        user_email: "owner@example.com",
        action: action::SHARE_SECRET,
        resource_path,
        resource_version: None,
        success: true,
        reason: None,
    };

    sharing
        .share(
            "owner@example.com",
            "expired-target@example.com",
            "team/secret",
            Permission::Read,
            Some(Utc::now() - Duration::minutes(1)),
            share_event("team/secret"),
        )
        .await
        .unwrap();

    sharing
        .share(
            "owner@example.com",
            "live-target@example.com",
            "team/secret",
            Permission::Read,
            Some(Utc::now() + Duration::hours(1)),
            share_event("team/secret"),
        )
        .await
        .unwrap();

    let deleted = sharing.delete_expired().await.unwrap();
    assert_eq!(deleted, 1);

    assert!(sharing
        .check_shared("team/secret", "live-target@example.com")
        .await
        .unwrap());
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn audit_log_records_and_lists_with_default_filter(pool: PgPool) {
    let audit = AuditLog::new(pool.clone());
    let user = seed_user(&pool, "owner@example.com").await;

    audit
        .log(AuditEvent {
            user_id: user,
            user_email: "owner@example.com",
            action: action::CREATE_SECRET,
            resource_path: "team/secret",
            resource_version: Some(1),
            success: true,
            reason: None,
        })
        .await
        .unwrap();

    audit
        .log(AuditEvent {
            user_id: user,
            user_email: "owner@example.com",
            action: action::READ_SECRET,
            resource_path: "team/secret",
            resource_version: Some(1),
            success: false,
            reason: Some("invalid HMAC signature"),
        })
        .await
        .unwrap();

    let entries = audit
        .list_for_user("owner@example.com", &AuditFilter::default())
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    // Most recent first.
    assert_eq!(entries[0].action, action::READ_SECRET);
    assert!(!entries[0].success);
    assert_eq!(entries[0].reason.as_deref(), Some("invalid HMAC signature"));
    assert_eq!(entries[1].action, action::CREATE_SECRET);
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn audit_log_filter_narrows_by_action_and_scopes_by_email(pool: PgPool) {
    let audit = AuditLog::new(pool.clone());
    let owner = seed_user(&pool, "owner@example.com").await;
    let other = seed_user(&pool, "other@example.com").await;

    for (user_id, email, act) in [
        (owner, "owner@example.com", action::CREATE_SECRET),
        (owner, "owner@example.com", action::UPDATE_SECRET),
        (other, "other@example.com", action::CREATE_SECRET),
    ] {
        audit
            .log(AuditEvent {
                user_id,
                user_email: email,
                action: act,
                resource_path: "team/secret",
                resource_version: Some(1),
                success: true,
                reason: None,
            })
            .await
            .unwrap();
    }

    let filter = AuditFilter {
        action: Some(action::CREATE_SECRET.to_owned()),
        ..AuditFilter::default()
    };
    let entries = audit
        .list_for_user("owner@example.com", &filter)
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, action::CREATE_SECRET);
    assert_eq!(entries[0].user_email, "owner@example.com");
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn audit_log_limit_and_offset_paginate(pool: PgPool) {
    let audit = AuditLog::new(pool.clone());
    let user = seed_user(&pool, "owner@example.com").await;

    for i in 0..5 {
        audit
            .log(AuditEvent {
                user_id: user,
                user_email: "owner@example.com",
                action: action::READ_SECRET,
                resource_path: "team/secret",
                resource_version: Some(i),
                success: true,
                reason: None,
            })
            .await
            .unwrap();
    }

    let page = AuditFilter {
        limit: 2,
        offset: 1,
        ..AuditFilter::default()
    };
    let entries = audit.list_for_user("owner@example.com", &page).await.unwrap();
    assert_eq!(entries.len(), 2);
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn ensure_active_key_installs_one_and_is_idempotent(pool: PgPool) {
    let registry = HmacKeyRegistry::new(pool.clone());

    assert!(registry.get_active().await.is_err());

    registry.ensure_active_key().await.unwrap();
    let first = registry.get_active().await.unwrap();

    registry.ensure_active_key().await.unwrap();
    let second = registry.get_active().await.unwrap();

    assert_eq!(first.id, second.id);
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn rotate_if_stale_leaves_a_fresh_key_alone(pool: PgPool) {
    let registry = HmacKeyRegistry::new(pool.clone());
    registry.ensure_active_key().await.unwrap();
    let before = registry.get_active().await.unwrap();

    let rotated = registry.rotate_if_stale(Duration::hours(1)).await.unwrap();
    assert!(!rotated);

    let after = registry.get_active().await.unwrap();
    assert_eq!(before.id, after.id);
}

#[sqlx::test(migrations = "../vaultify-server/migrations")]
async fn rotate_if_stale_replaces_an_old_key_and_keeps_exactly_one_active(pool: PgPool) {
    let registry = HmacKeyRegistry::new(pool.clone());
    registry.ensure_active_key().await.unwrap();
    let before = registry.get_active().await.unwrap();

    // Back-date the row so it reads as older than any positive staleness.
    sqlx::query("UPDATE hmac_keys SET created_at = now() - interval '1000 hours'")
        .execute(&pool)
        .await
        .unwrap();

    let rotated = registry
        .rotate_if_stale(Duration::hours(1))
        .await
        .unwrap();
    assert!(rotated);

    let after = registry.get_active().await.unwrap();
    assert_ne!(before.id, after.id);

    // The old, now-inactive key is still addressable by id.
    let old = registry.get_by_id(before.id).await.unwrap();
    assert!(!old.is_active);

    let active_count: i64 = sqlx::query_scalar("SELECT count(*) FROM hmac_keys WHERE is_active")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(active_count, 1);
}
