//! End-to-end bootstrap against an on-disk SQLite database.
//!
//! Each `SqliteStore::open` gets its own connection, so two stores over one
//! file behave like two processes sharing the CA database.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vaulters_ca::authority::{CertificateAuthority, KeyOrigin};
use vaulters_ca::key_store::KeyStore;
use vaulters_ca::principals::{NewPrincipal, PrincipalStore, Role};
use vaulters_ca::sqlite_store::SqliteStore;

use common::{ca_material, csr, vaulters_ca, CountingGenerator, ISSUER_DN};

fn authority(store: SqliteStore, generator: Arc<CountingGenerator>) -> CertificateAuthority {
    let store = Arc::new(store);
    CertificateAuthority::new(store.clone(), store, generator)
}

#[tokio::test]
async fn test_ca_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ca.db");

    let store = SqliteStore::open(&db_path).unwrap();
    let merger = store
        .insert_principal(NewPrincipal {
            phone: Some("010-0000-0000".to_string()),
            role: Role::MERGER,
            ..Default::default()
        })
        .await
        .unwrap()
        .id;

    let generator = Arc::new(CountingGenerator::new(vaulters_ca()));
    let first = authority(store.clone(), generator.clone());
    let report = first.bootstrap().await.unwrap();
    assert_eq!(report.origin, KeyOrigin::Generated);
    assert_eq!(report.propagation.unwrap().updated, vec![merger]);

    let stored = store.get_principal(merger).await.unwrap().unwrap();
    assert_eq!(
        stored.cert.as_deref(),
        Some(report.key_pair.certificate_pem().unwrap().as_str())
    );
    assert_eq!(
        stored.public_key.as_deref(),
        Some(report.key_pair.public_key_pem().unwrap().as_str())
    );

    let (request, _) = csr("/CN=alice");
    let before_restart = first.issue_certificate(&request).await.unwrap();
    drop(first);

    let reopened = SqliteStore::open(&db_path).unwrap();
    let second = authority(reopened, generator.clone());
    assert_eq!(second.issuer_attributes().await.unwrap(), ISSUER_DN);
    let loaded = second.bootstrap().await.unwrap();
    assert_eq!(loaded.origin, KeyOrigin::Loaded);

    let after_restart = second.issue_certificate(&request).await.unwrap();
    assert!(before_restart
        .certificate
        .verify(&loaded.key_pair.public_key)
        .unwrap());
    assert_eq!(
        after_restart.issuer_string().unwrap(),
        before_restart.issuer_string().unwrap()
    );
    assert_eq!(generator.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_connections_race_for_one_ca() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ca.db");

    let store_a = SqliteStore::open(&db_path).unwrap();
    let store_b = SqliteStore::open(&db_path).unwrap();
    let ca_a = authority(
        store_a.clone(),
        Arc::new(
            CountingGenerator::new(ca_material("theVaulters"))
                .with_delay(Duration::from_millis(20)),
        ),
    );
    let ca_b = authority(
        store_b,
        Arc::new(
            CountingGenerator::new(ca_material("theVaulters"))
                .with_delay(Duration::from_millis(20)),
        ),
    );

    let (a, b) = tokio::join!(ca_a.bootstrap(), ca_b.bootstrap());
    let (a, b) = (a.unwrap(), b.unwrap());

    let canonical = store_a.canonical_record().await.unwrap().unwrap();
    assert_eq!(a.key_pair.certificate_pem().unwrap(), canonical.certificate_pem);
    assert_eq!(b.key_pair.certificate_pem().unwrap(), canonical.certificate_pem);

    let origins = [a.origin, b.origin];
    assert!(origins.contains(&KeyOrigin::Generated));
    assert!(origins.contains(&KeyOrigin::Adopted) || origins.contains(&KeyOrigin::Loaded));
}
