// src/formats/selection.rs
//! Credential selection and revocation resolution.
//!
//! For every referent of a proof request independently: query the holder
//! for candidates, resolve each candidate's revocation status, rank
//! non-revoked candidates first, optionally drop revoked ones, and (for
//! automatic selection) take the first remaining candidate per referent.
//!
//! A referent with no remaining candidate fails selection hard: an
//! incomplete presentation is worse than none.

use crate::error::ProofError;
use crate::models::proof_request::NonRevokedInterval;
use crate::models::{
    CredentialInfo, CredentialsForRequest, ProofRequest, RequestedAttributeMatch,
    RequestedPredicateMatch, SelectedCredentials,
};
use crate::services::{HolderService, LedgerRegistry};
use chrono::Utc;
use futures::future::try_join_all;
use log::trace;

/// Options for candidate retrieval and automatic selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectionOptions {
    /// Drop candidates whose revocation status resolved to revoked.
    /// Demotion is not enough: a revoked credential must never be
    /// auto-selected.
    pub filter_by_non_revocation_requirements: bool,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        SelectionOptions {
            filter_by_non_revocation_requirements: true,
        }
    }
}

/// Validates a non-revocation interval against best-practice rules.
///
/// A lower bound without a matching upper bound opens an unreasonably
/// wide verification window; conforming requests pin `from == to`. An
/// absent `from` means "no lower bound" and is fine.
///
/// # Errors
/// `ProofError::RevocationInterval` when `from` is set and `to` is
/// absent or differs from it.
pub fn assert_best_practice_interval(interval: &NonRevokedInterval) -> Result<(), ProofError> {
    if let Some(from) = interval.from {
        match interval.to {
            Some(to) if to == from => {}
            _ => {
                return Err(ProofError::RevocationInterval(format!(
                    "interval from `{}` must equal interval to `{}`",
                    from,
                    interval
                        .to
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "<unset>".to_string())
                )))
            }
        }
    }
    Ok(())
}

/// Resolved revocation status of one candidate.
struct RevocationStatus {
    /// `None` means non-revocation was not requested or the credential
    /// is not revocable
    revoked: Option<bool>,
    /// Timestamp of the status list consulted
    timestamp: Option<i64>,
}

/// Computes revocation applicability and status for one candidate.
async fn resolve_revocation_status(
    ledger: &dyn LedgerRegistry,
    interval: Option<NonRevokedInterval>,
    info: &CredentialInfo,
) -> Result<RevocationStatus, ProofError> {
    // No interval requested, or credential not revocable: status is not
    // applicable and the candidate is never filtered for it.
    let (Some(interval), Some(registry_id), Some(index)) = (
        interval,
        info.revocation_registry_id.as_deref(),
        info.credential_revocation_index,
    ) else {
        return Ok(RevocationStatus {
            revoked: None,
            timestamp: None,
        });
    };

    assert_best_practice_interval(&interval)?;

    // Only `to` is defaulted; an absent `from` simply means no lower
    // bound.
    let to = interval.to.unwrap_or_else(|| Utc::now().timestamp());

    trace!(
        "fetching revocation status for credential index {} in registry {} at {}",
        index,
        registry_id,
        to
    );

    let status_list = ledger.get_revocation_status_list(registry_id, to).await?;
    Ok(RevocationStatus {
        revoked: Some(status_list.is_revoked(index)),
        timestamp: Some(status_list.timestamp),
    })
}

/// Stable partition: non-revoked (`false` or not applicable) before
/// revoked, preserving holder order within each class.
fn rank_non_revoked_first<T>(items: Vec<T>, revoked: impl Fn(&T) -> Option<bool>) -> Vec<T> {
    let (clean, dirty): (Vec<T>, Vec<T>) =
        items.into_iter().partition(|item| revoked(item) != Some(true));
    clean.into_iter().chain(dirty).collect()
}

/// Retrieves and ranks candidate credentials for every referent of
/// `request`.
pub async fn get_credentials_for_request(
    holder: &dyn HolderService,
    ledger: &dyn LedgerRegistry,
    request: &ProofRequest,
    options: &SelectionOptions,
) -> Result<CredentialsForRequest, ProofError> {
    let mut result = CredentialsForRequest::default();

    for (referent, requested) in &request.requested_attributes {
        let candidates = holder
            .get_credentials_for_proof_request(request, referent)
            .await?;
        let interval = request.effective_interval(requested.non_revoked.as_ref());

        let matches = try_join_all(candidates.into_iter().map(|candidate| async move {
            let status =
                resolve_revocation_status(ledger, interval, &candidate.credential_info).await?;
            Ok::<_, ProofError>(RequestedAttributeMatch {
                credential_id: candidate.credential_info.credential_id.clone(),
                revealed: true,
                credential_info: candidate.credential_info,
                revoked: status.revoked,
                timestamp: status.timestamp,
            })
        }))
        .await?;

        let mut ranked = rank_non_revoked_first(matches, |m| m.revoked);
        if options.filter_by_non_revocation_requirements {
            ranked.retain(|m| m.revoked != Some(true));
        }
        result.attributes.insert(referent.clone(), ranked);
    }

    for (referent, requested) in &request.requested_predicates {
        let candidates = holder
            .get_credentials_for_proof_request(request, referent)
            .await?;
        let interval = request.effective_interval(requested.non_revoked.as_ref());

        let matches = try_join_all(candidates.into_iter().map(|candidate| async move {
            let status =
                resolve_revocation_status(ledger, interval, &candidate.credential_info).await?;
            Ok::<_, ProofError>(RequestedPredicateMatch {
                credential_id: candidate.credential_info.credential_id.clone(),
                credential_info: candidate.credential_info,
                revoked: status.revoked,
                timestamp: status.timestamp,
            })
        }))
        .await?;

        let mut ranked = rank_non_revoked_first(matches, |m| m.revoked);
        if options.filter_by_non_revocation_requirements {
            ranked.retain(|m| m.revoked != Some(true));
        }
        result.predicates.insert(referent.clone(), ranked);
    }

    Ok(result)
}

/// Automatically selects one credential per referent: the first ranked
/// candidate.
///
/// # Errors
/// `ProofError::NoSuitableCredential` naming the first referent with no
/// remaining candidate.
pub async fn select_credentials_for_request(
    holder: &dyn HolderService,
    ledger: &dyn LedgerRegistry,
    request: &ProofRequest,
    options: &SelectionOptions,
) -> Result<SelectedCredentials, ProofError> {
    let credentials = get_credentials_for_request(holder, ledger, request, options).await?;
    let mut selection = SelectedCredentials::default();

    for (referent, mut candidates) in credentials.attributes {
        if candidates.is_empty() {
            return Err(ProofError::NoSuitableCredential { referent });
        }
        selection.attributes.insert(referent, candidates.remove(0));
    }

    for (referent, mut candidates) in credentials.predicates {
        if candidates.is_empty() {
            return Err(ProofError::NoSuitableCredential { referent });
        }
        selection.predicates.insert(referent, candidates.remove(0));
    }

    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestedAttribute, Restriction};
    use crate::services::registry::RevocationStatusList;
    use crate::services::{InMemoryHolder, InMemoryLedger};
    use std::collections::BTreeMap;

    fn revocable_credential(id: &str, index: u32) -> CredentialInfo {
        CredentialInfo {
            credential_id: id.to_string(),
            attributes: BTreeMap::from([("name".to_string(), format!("holder-{index}"))]),
            schema_id: "did:sov:issuer:2:employment:1.0".to_string(),
            cred_def_id: "did:sov:issuer:3:CL:12:default".to_string(),
            revocation_registry_id: Some("revreg:1".to_string()),
            credential_revocation_index: Some(index),
        }
    }

    fn request_with_interval(interval: Option<NonRevokedInterval>) -> ProofRequest {
        ProofRequest {
            name: "Proof Request".to_string(),
            version: "1.0".to_string(),
            nonce: "1".to_string(),
            requested_attributes: BTreeMap::from([(
                "attr_0".to_string(),
                RequestedAttribute {
                    name: Some("name".to_string()),
                    restrictions: Some(vec![Restriction::default()]),
                    non_revoked: interval,
                    ..Default::default()
                },
            )]),
            requested_predicates: BTreeMap::new(),
            non_revoked: None,
        }
    }

    async fn holder_with(credentials: &[CredentialInfo]) -> InMemoryHolder {
        let holder = InMemoryHolder::new();
        for credential in credentials {
            holder.store_credential(credential.clone()).await;
        }
        holder
    }

    #[test]
    fn test_best_practice_interval_rules() {
        // from == to conforms
        assert!(assert_best_practice_interval(&NonRevokedInterval {
            from: Some(100),
            to: Some(100)
        })
        .is_ok());
        // no lower bound conforms
        assert!(assert_best_practice_interval(&NonRevokedInterval {
            from: None,
            to: Some(100)
        })
        .is_ok());
        // mismatched window is rejected
        assert!(assert_best_practice_interval(&NonRevokedInterval {
            from: Some(50),
            to: Some(100)
        })
        .is_err());
        // a lower bound without an upper bound is rejected
        assert!(assert_best_practice_interval(&NonRevokedInterval {
            from: Some(50),
            to: None
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_filtering_drops_revoked_and_keeps_order() {
        let holder = holder_with(&[
            revocable_credential("cred-a", 0),
            revocable_credential("cred-b", 1),
            revocable_credential("cred-c", 2),
        ])
        .await;

        let ledger = InMemoryLedger::new();
        // Credential at index 1 is revoked
        ledger
            .anchor_status_list(RevocationStatusList {
                revocation_registry_id: "revreg:1".to_string(),
                timestamp: 100,
                revocation_list: vec![0, 1, 0],
            })
            .await;

        let request = request_with_interval(Some(NonRevokedInterval {
            from: Some(100),
            to: Some(100),
        }));

        let filtered = get_credentials_for_request(
            &holder,
            &ledger,
            &request,
            &SelectionOptions {
                filter_by_non_revocation_requirements: true,
            },
        )
        .await
        .unwrap();
        let ids: Vec<&str> = filtered.attributes["attr_0"]
            .iter()
            .map(|m| m.credential_id.as_str())
            .collect();
        assert_eq!(ids, vec!["cred-a", "cred-c"]);

        let unfiltered = get_credentials_for_request(
            &holder,
            &ledger,
            &request,
            &SelectionOptions {
                filter_by_non_revocation_requirements: false,
            },
        )
        .await
        .unwrap();
        let ids: Vec<(&str, Option<bool>)> = unfiltered.attributes["attr_0"]
            .iter()
            .map(|m| (m.credential_id.as_str(), m.revoked))
            .collect();
        // All three returned, non-revoked first, original relative order
        assert_eq!(
            ids,
            vec![
                ("cred-a", Some(false)),
                ("cred-c", Some(false)),
                ("cred-b", Some(true))
            ]
        );
    }

    #[tokio::test]
    async fn test_no_interval_leaves_status_unresolved() {
        let holder = holder_with(&[revocable_credential("cred-a", 0)]).await;
        let ledger = InMemoryLedger::new();

        let request = request_with_interval(None);
        let result = get_credentials_for_request(
            &holder,
            &ledger,
            &request,
            &SelectionOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.attributes["attr_0"][0].revoked, None);
    }

    #[tokio::test]
    async fn test_selection_exhaustion_names_the_referent() {
        let holder = holder_with(&[revocable_credential("cred-a", 0)]).await;
        let ledger = InMemoryLedger::new();
        // The only candidate is revoked
        ledger
            .anchor_status_list(RevocationStatusList {
                revocation_registry_id: "revreg:1".to_string(),
                timestamp: 100,
                revocation_list: vec![1],
            })
            .await;

        let request = request_with_interval(Some(NonRevokedInterval {
            from: Some(100),
            to: Some(100),
        }));

        let err = select_credentials_for_request(
            &holder,
            &ledger,
            &request,
            &SelectionOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ProofError::NoSuitableCredential { referent } if referent == "attr_0"
        ));
    }

    #[tokio::test]
    async fn test_selection_takes_first_ranked_candidate() {
        let holder = holder_with(&[
            revocable_credential("cred-a", 0),
            revocable_credential("cred-b", 1),
        ])
        .await;
        let ledger = InMemoryLedger::new();
        ledger
            .anchor_status_list(RevocationStatusList {
                revocation_registry_id: "revreg:1".to_string(),
                timestamp: 100,
                revocation_list: vec![1, 0],
            })
            .await;

        let request = request_with_interval(Some(NonRevokedInterval {
            from: Some(100),
            to: Some(100),
        }));

        let selection = select_credentials_for_request(
            &holder,
            &ledger,
            &request,
            &SelectionOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(selection.attributes["attr_0"].credential_id, "cred-b");
    }
}
