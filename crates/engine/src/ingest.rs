use crate::error::EngineError;
use chrono::SubsecRound;
use core_types::{CoreError, Index, PriceObservation};
use database::DbRepository;
use rust_decimal::Decimal;

/// Write side: index metadata and price appends. Writes land in the store
/// only; readers see their effect after the next refresh publishes.
#[derive(Debug, Clone)]
pub struct IngestService {
    repo: DbRepository,
}

impl IngestService {
    pub fn new(repo: DbRepository) -> Self {
        Self { repo }
    }

    pub async fn upsert_index(
        &self,
        code: &str,
        name: &str,
        full_name: Option<&str>,
    ) -> Result<Index, EngineError> {
        let code = code.trim();
        let name = name.trim();
        if code.is_empty() {
            return Err(CoreError::invalid("code", "must not be empty").into());
        }
        if name.is_empty() {
            return Err(CoreError::invalid("name", "must not be empty").into());
        }
        let full_name = full_name.map(str::trim).filter(|f| !f.is_empty());

        let index = self.repo.upsert_index(code, name, full_name).await?;
        tracing::info!(code = %index.code, "Upserted index.");
        Ok(index)
    }

    /// Appends one price and returns it as stored. The timestamp is truncated
    /// to whole microseconds and must then be strictly after the latest stored
    /// observation of the same index.
    pub async fn append_observation(
        &self,
        code: &str,
        observation: PriceObservation,
    ) -> Result<PriceObservation, EngineError> {
        if observation.price <= Decimal::ZERO {
            return Err(CoreError::invalid(
                "price",
                format!("must be positive, got {}", observation.price),
            )
            .into());
        }

        let observation = PriceObservation { timestamp: observation.timestamp.trunc_subsecs(6), ..observation };

        match self.repo.append_observation(code, observation).await {
            Ok(()) => {
                tracing::debug!(code, at = %observation.timestamp, price = %observation.price, "Appended observation.");
                Ok(observation)
            }
            Err(e) => {
                let err = EngineError::from(e);
                if matches!(err, EngineError::OutOfOrder(_)) {
                    tracing::warn!(code, error = %err, "Rejected out-of-order observation.");
                }
                Err(err)
            }
        }
    }
}
