use std::sync::Arc;
use std::time::Instant;

use log::{error, info};

use crate::shared::models::{
    NewClassification, NewTicket, StoredTicket, UnifiedTicket, STATUS_NEW, STATUS_RESOLVED,
};
use crate::shared::state::AppState;
use crate::storage::{Storage, StorageError};
use crate::{assignment, cache, geo, ingest, llm};

/// Classification substituted when the model is unavailable or returns
/// garbage: neutral, low priority, flagged for manual review. Writing it
/// keeps the idempotency marker in place so the ticket is not re-processed.
fn fallback_analysis(text: &str) -> llm::LlmAnalysis {
    llm::LlmAnalysis {
        category: "Консультация".to_string(),
        sentiment: "Нейтральный".to_string(),
        priority: 2,
        language: "RU".to_string(),
        summary: text.chars().take(200).collect(),
        recommendation: "Требуется ручная проверка (LLM недоступен)".to_string(),
    }
}

enum Resolution {
    AlreadyProcessed,
    Fresh(StoredTicket),
}

/// Idempotency and persistence resolution. Voice/chat tickets are not
/// pre-inserted by any other component, so the pipeline owns this write.
async fn resolve_ticket(
    storage: &dyn Storage,
    ticket: &UnifiedTicket,
) -> Result<Resolution, StorageError> {
    if let Some(guid) = &ticket.guid {
        if let Some(existing) = storage.find_ticket(guid, ticket.company_id).await? {
            if storage.classification_for(existing.id).await?.is_some() {
                return Ok(Resolution::AlreadyProcessed);
            }
            return Ok(Resolution::Fresh(existing));
        }
        let row = storage.insert_ticket(new_row(ticket, guid.clone())).await?;
        return Ok(Resolution::Fresh(row));
    }

    let guid = ingest::synthesize_guid(ticket.source);
    let row = storage.insert_ticket(new_row(ticket, guid)).await?;
    Ok(Resolution::Fresh(row))
}

fn new_row(ticket: &UnifiedTicket, guid: String) -> NewTicket {
    NewTicket {
        company_id: ticket.company_id,
        guid,
        description: ticket.text.clone(),
        source: ticket.source,
        status: ticket
            .status
            .clone()
            .unwrap_or_else(|| STATUS_NEW.to_string()),
        segment: ticket.segment.clone(),
        gender: ticket.gender.clone(),
        birth_date: ticket.birth_date.clone(),
        contact: ticket.contact.clone(),
        country: ticket.country.clone(),
        city: ticket.city.clone(),
        street: ticket.street.clone(),
        house: ticket.house.clone(),
    }
}

/// The handler registered with the worker pool: persistence/idempotency →
/// classification (with fixed fallback) → geocoding (optional) →
/// assignment → cache invalidation.
///
/// Only storage failures and assignment configuration errors propagate to
/// the pool's single-retry logic; model and geocoder failures are absorbed
/// here, and cache invalidation runs even when assignment failed.
///
/// When assignment fails after the classification landed, the retry
/// short-circuits at the idempotency check and the ticket stays classified
/// but unassigned until the tenant configuration is fixed and it is
/// re-enqueued.
pub async fn handle(state: Arc<AppState>, ticket: UnifiedTicket) -> anyhow::Result<()> {
    let started = Instant::now();
    let guid = ticket.guid_for_log().to_string();
    info!(
        "[Analysis] processing ticket \"{guid}\" (source: {})",
        ticket.source
    );

    let storage = state.storage.as_ref();

    // 1. Idempotency / persistence resolution.
    let stored = match resolve_ticket(storage, &ticket).await? {
        Resolution::AlreadyProcessed => {
            info!("[Analysis] ticket \"{guid}\" already analyzed, skipping");
            return Ok(());
        }
        Resolution::Fresh(row) => row,
    };

    // 2. Classification, never blocking throughput on model availability.
    let analysis = match llm::classify(
        &state.config.llm,
        &state.http,
        &ticket.text,
        &ticket.images,
    )
    .await
    {
        Ok(analysis) => analysis,
        Err(err) => {
            error!("[Analysis] LLM failed for \"{guid}\": {err}");
            fallback_analysis(&ticket.text)
        }
    };

    // 3. Persist the classification; its row is the idempotency marker.
    let classification = storage
        .put_classification(NewClassification {
            ticket_id: stored.id,
            category: analysis.category,
            sentiment: analysis.sentiment,
            priority: analysis.priority,
            language: analysis.language,
            summary: analysis.summary,
            recommendation: analysis.recommendation,
        })
        .await?;

    // 4. Geocoding; failure must not abort assignment.
    let mut coords = None;
    if let Some((lat, lon)) = geo::geocode_address(
        &state.config.geo,
        &state.http,
        ticket.country.as_deref(),
        ticket.city.as_deref(),
        ticket.street.as_deref(),
        ticket.house.as_deref(),
    )
    .await
    {
        coords = Some((lat, lon));
        if let Err(err) = storage.set_ticket_coords(stored.id, lat, lon).await {
            error!("[Analysis] coordinate update failed for \"{guid}\": {err}");
        }
    }
    let (lat, lon) = (coords.map(|c| c.0), coords.map(|c| c.1));

    // 5. Assignment: scored routing, or direct-to-bot for tickets an
    // upstream channel already resolved.
    let status = ticket.status.as_deref().unwrap_or(STATUS_NEW);
    let assigned = if status != STATUS_RESOLVED {
        assignment::assign_ticket(storage, stored.id, Some(classification.id), lat, lon).await
    } else {
        assignment::assign_to_bot(storage, stored.id, Some(classification.id), stored.company_id)
            .await
    };

    // 6. Cache invalidation runs unconditionally, last.
    if let Err(err) = cache::invalidate_stats(&state.redis).await {
        error!("[Analysis] stats cache invalidation failed: {err}");
    }

    let outcome = assigned?;
    info!(
        "[Analysis] ticket \"{guid}\" → {} ({})",
        outcome.manager_name, outcome.office
    );
    info!(
        "[Analysis] done \"{guid}\" in {}ms",
        started.elapsed().as_millis()
    );
    Ok(())
}
