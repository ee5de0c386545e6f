//! Resource taxonomy (C10): endpoint classes composed additively by
//! service kind (§4.10).
//!
//! - **Base** — `/`, `/favicon.ico`, `/robots.txt`; present on every
//!   service, unauthenticated.
//! - **Restricted** — everything else requires a session and a
//!   functional account.
//! - **Admin** — on restricted: `/busy`, `/backup`, `/services`,
//!   `/shutdown`.
//! - **Repository** — on restricted: `/num_petitions`, `/petition`,
//!   `/update`, `/metadata`.
//! - **File repository** — on repository: `/file`, `/ip`, `/thumbnail`.
//! - **Tag repository** — on repository, no further endpoints.

pub mod admin;
pub mod base;
pub mod repository;
pub mod restricted;
pub mod types;

use axum::Router;

use vaultkeep_runtime::DbEngine;

use crate::state::ServiceState;

/// Which additive layers of the taxonomy a given service mounts, per
/// §4.10. `AdminService` is the one service the admin layer is mounted
/// on in practice, but the composition is expressed generically so a
/// future service kind can opt into any subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Admin service: base + restricted + admin.
    Admin,
    /// File repository: base + restricted + repository + file repository.
    FileRepository,
    /// Tag repository: base + restricted + repository (no further
    /// endpoints).
    TagRepository,
}

/// Builds the full router for `kind`, per the additive composition in
/// §4.10. Callers still need to apply the restrictions/CORS middleware
/// layers (`vaultkeep_server::middleware`) around the result.
pub fn build_router<E: DbEngine>(kind: ServiceKind) -> Router<ServiceState<E>> {
    let mut router = base::routes().merge(restricted::routes());

    router = match kind {
        ServiceKind::Admin => router.merge(admin::routes()),
        ServiceKind::FileRepository => router.merge(repository::routes()).merge(repository::file_repository_routes()),
        ServiceKind::TagRepository => router.merge(repository::routes()).merge(repository::tag_repository_routes()),
    };

    router
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopEngine;

    impl DbEngine for NoopEngine {
        async fn read(&self, _action: &str, _args: vaultkeep_runtime::DbArgs) -> vaultkeep_runtime::Result<vaultkeep_runtime::DbValue> {
            Ok(serde_json::json!(null))
        }

        async fn write(&self, _action: &str, _args: vaultkeep_runtime::DbArgs) -> vaultkeep_runtime::Result<vaultkeep_runtime::DbValue> {
            Ok(serde_json::json!(null))
        }
    }

    #[test]
    fn every_service_kind_builds_a_router() {
        let _admin: Router<ServiceState<NoopEngine>> = build_router(ServiceKind::Admin);
        let _file: Router<ServiceState<NoopEngine>> = build_router(ServiceKind::FileRepository);
        let _tag: Router<ServiceState<NoopEngine>> = build_router(ServiceKind::TagRepository);
    }
}
