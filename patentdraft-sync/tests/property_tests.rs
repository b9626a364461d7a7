//! Property tests for cache consistency across mutation sequences.

use patentdraft_cache::{CacheStore, DraftCacheKey, Freshness};
use patentdraft_core::{rebuild_or_empty, GatewayError, SectionMap, SectionType};
use patentdraft_test_utils::fixtures::{all_keys, doc, reconciler, TestReconciler};
use patentdraft_test_utils::generators::{arb_content, arb_mutation, arb_section_type, Mutation};
use patentdraft_test_utils::{GatewayOp, MockGateway, ProjectId, TenantId};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn arb_seed() -> impl Strategy<Value = Vec<(SectionType, String)>> {
    proptest::collection::btree_map(arb_section_type(), arb_content(), 0..5)
        .prop_map(|sections| sections.into_iter().collect())
}

fn seeded(sections: &[(SectionType, String)]) -> (TenantId, ProjectId, MockGateway, TestReconciler) {
    let tenant = TenantId::now_v7();
    let project = ProjectId::now_v7();
    let gateway = MockGateway::new();
    gateway.seed(
        tenant,
        project,
        sections
            .iter()
            .map(|(section, content)| doc(project, *section, content))
            .collect(),
    );
    let reconciler = reconciler(gateway.clone());
    (tenant, project, gateway, reconciler)
}

async fn apply(
    reconciler: &TestReconciler,
    tenant: TenantId,
    project: ProjectId,
    mutation: Mutation,
) -> Result<(), patentdraft_core::DraftError> {
    match mutation {
        Mutation::Single(update) => reconciler
            .update_section(tenant, project, update)
            .await
            .map(|_| ()),
        Mutation::Batch(updates) => reconciler
            .batch_update(tenant, project, updates)
            .await
            .map(|_| ()),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any sequence of accepted mutations, each content view is the
    /// rebuild of its list view.
    #[test]
    fn prop_content_matches_rebuilt_list(
        seed in arb_seed(),
        mutations in proptest::collection::vec(arb_mutation(), 1..6),
    ) {
        runtime().block_on(async {
            let (tenant, project, _gateway, reconciler) = seeded(&seed);
            reconciler
                .content(tenant, project, false, Freshness::consistent())
                .await
                .unwrap();

            for mutation in mutations {
                apply(&reconciler, tenant, project, mutation).await.unwrap();
            }

            for skip_init in [false, true] {
                let read = reconciler
                    .content(tenant, project, skip_init, Freshness::consistent())
                    .await
                    .unwrap();
                let list = reconciler
                    .store()
                    .get(&DraftCacheKey::list_for(tenant, project, skip_init))
                    .unwrap()
                    .unwrap();
                let documents = list.value.as_documents().unwrap();
                let expected = rebuild_or_empty(&SectionMap::from_documents(documents));
                prop_assert_eq!(&read.value().content, &expected);

                let entry = reconciler
                    .store()
                    .get(&DraftCacheKey::content_for(tenant, project, skip_init))
                    .unwrap()
                    .unwrap();
                prop_assert!(entry.is_valid());
                prop_assert_eq!(&entry.value.as_composed().unwrap().content, &expected);
            }
            Ok(())
        })?;
    }

    /// A rejected mutation leaves every key exactly as it was.
    #[test]
    fn prop_rejected_mutation_restores_cache(
        seed in arb_seed(),
        mutation in arb_mutation(),
        invalidate_first in any::<bool>(),
        status in prop_oneof![Just(400u16), Just(409), Just(422), Just(500)],
    ) {
        runtime().block_on(async {
            let (tenant, project, gateway, reconciler) = seeded(&seed);
            reconciler
                .content(tenant, project, true, Freshness::consistent())
                .await
                .unwrap();
            if invalidate_first {
                reconciler.invalidate_project(tenant, project).unwrap();
            }

            let keys = all_keys(tenant, project);
            let before = reconciler.store().get_many(&keys).unwrap();
            let op = match &mutation {
                Mutation::Single(_) => GatewayOp::Update,
                Mutation::Batch(_) => GatewayOp::Batch,
            };
            gateway.fail_next(
                op,
                GatewayError::Status {
                    status,
                    message: "rejected".into(),
                },
                1,
            );

            let result = apply(&reconciler, tenant, project, mutation).await;
            prop_assert_eq!(result.unwrap_err().status(), Some(status));
            prop_assert_eq!(reconciler.store().get_many(&keys).unwrap(), before);
            Ok(())
        })?;
    }
}
