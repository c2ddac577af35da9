use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{haversine, OFFICE_COORDS};
use crate::shared::models::{Manager, Office, BOT_MANAGER_NAME, VIP_SEGMENT};
use crate::storage::{Storage, StorageError};

const OFFICE_MATCH_BONUS: i32 = 100;
const CATEGORY_SKILL_BONUS: i32 = 30;
const LANGUAGE_SKILL_BONUS: i32 = 30;
const VIP_BONUS: i32 = 50;
const LOAD_PENALTY_PER_TICKET: i32 = 10;

/// Office name preferred when neither coordinates nor the city resolve one.
const DEFAULT_OFFICE: &str = "AST-1";

#[derive(Debug, Error)]
pub enum AssignError {
    #[error("ticket #{0} not found")]
    TicketMissing(i64),
    #[error("no offices configured for company #{0}")]
    NoOffices(i64),
    #[error("no managers available for company #{0}")]
    NoManagers(i64),
    #[error("automation agent \"{BOT_MANAGER_NAME}\" missing for company #{0}")]
    BotMissing(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Machine-reconstructable justification persisted with every assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentReason {
    pub office: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<i64>,
    pub score: i32,
    /// Per-term contributions, e.g. `["+100 Office", "-20 Load"]`.
    pub terms: Vec<String>,
    pub load_before: i32,
    pub load_after: i32,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AssignmentOutcome {
    pub manager_id: i64,
    pub manager_name: String,
    pub office: String,
    pub reason: AssignmentReason,
}

/// The candidate office the scoring run targets, and how it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct OfficePick {
    pub office_id: Option<i64>,
    pub office: String,
    pub distance_km: Option<f64>,
}

/// Office resolution order: nearest by haversine when coordinates are known,
/// else a case-insensitive city substring match against office names and
/// addresses, else the fixed default office, else the tenant's first office.
/// Office rows without coordinates borrow them from the static branch table
/// by office name.
pub fn pick_office(
    offices: &[Office],
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<&str>,
) -> Option<OfficePick> {
    let first = offices.first()?;

    if let (Some(lat), Some(lon)) = (lat, lon) {
        let nearest = offices
            .iter()
            .filter_map(|o| {
                let (o_lat, o_lon) = o
                    .latitude
                    .zip(o.longitude)
                    .or_else(|| OFFICE_COORDS.get(o.office.as_str()).copied())?;
                Some((o, haversine(lat, lon, o_lat, o_lon)))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((office, distance)) = nearest {
            return Some(OfficePick {
                office_id: Some(office.id),
                office: office.office.clone(),
                distance_km: Some(distance),
            });
        }
        // No office resolves to coordinates; fall through to the first one.
        return Some(OfficePick {
            office_id: Some(first.id),
            office: first.office.clone(),
            distance_km: None,
        });
    }

    if let Some(city) = city {
        let needle = city.trim().to_lowercase();
        if !needle.is_empty() {
            let by_city = offices.iter().find(|o| {
                o.office.to_lowercase().contains(&needle)
                    || o.address
                        .as_deref()
                        .is_some_and(|a| a.to_lowercase().contains(&needle))
            });
            if let Some(office) = by_city {
                return Some(OfficePick {
                    office_id: Some(office.id),
                    office: office.office.clone(),
                    distance_km: None,
                });
            }
        }
    }

    let fallback = offices
        .iter()
        .find(|o| o.office == DEFAULT_OFFICE)
        .unwrap_or(first);
    Some(OfficePick {
        office_id: Some(fallback.id),
        office: fallback.office.clone(),
        distance_km: None,
    })
}

/// One scored candidate: the total plus every contributing term, so the
/// selection is auditable after the fact.
#[derive(Debug, Clone)]
pub struct ScoredManager {
    pub manager: Manager,
    pub score: i32,
    pub terms: Vec<String>,
}

pub fn score_manager(
    manager: &Manager,
    candidate_office: &str,
    category: &str,
    language: &str,
    segment: Option<&str>,
) -> ScoredManager {
    let mut score = 0;
    let mut terms = Vec::new();

    if manager.office == candidate_office {
        score += OFFICE_MATCH_BONUS;
        terms.push(format!("+{OFFICE_MATCH_BONUS} Office"));
    }

    if !category.is_empty() && manager.skills.iter().any(|s| s == category) {
        score += CATEGORY_SKILL_BONUS;
        terms.push(format!("+{CATEGORY_SKILL_BONUS} Category"));
    }
    if !language.is_empty() && manager.skills.iter().any(|s| s == language) {
        score += LANGUAGE_SKILL_BONUS;
        terms.push(format!("+{LANGUAGE_SKILL_BONUS} Language"));
    }

    if segment == Some(VIP_SEGMENT) {
        if manager.skills.iter().any(|s| s == VIP_SEGMENT) {
            score += VIP_BONUS;
            terms.push(format!("+{VIP_BONUS} VIP"));
        } else {
            score -= VIP_BONUS;
            terms.push(format!("-{VIP_BONUS} Non-VIP"));
        }
    }

    let load_penalty = manager.current_load.max(0) * LOAD_PENALTY_PER_TICKET;
    score -= load_penalty;
    terms.push(format!("-{load_penalty} Load"));

    ScoredManager {
        manager: manager.clone(),
        score,
        terms,
    }
}

/// Highest score wins; ties break on lower current load, then on id so the
/// result is fully deterministic.
pub fn select_best(mut scored: Vec<ScoredManager>) -> Option<ScoredManager> {
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.manager.current_load.cmp(&b.manager.current_load))
            .then(a.manager.id.cmp(&b.manager.id))
    });
    scored.into_iter().next()
}

/// Scores every eligible tenant manager and commits the winning assignment
/// plus an atomic load increment.
pub async fn assign_ticket(
    storage: &dyn Storage,
    ticket_id: i64,
    analysis_id: Option<i64>,
    lat: Option<f64>,
    lon: Option<f64>,
) -> Result<AssignmentOutcome, AssignError> {
    let ticket = storage
        .get_ticket(ticket_id)
        .await?
        .ok_or(AssignError::TicketMissing(ticket_id))?;

    let (category, language) = match analysis_id {
        Some(id) => storage
            .get_classification(id)
            .await?
            .map(|c| (c.category, c.language))
            .unwrap_or_default(),
        None => Default::default(),
    };

    let offices = storage.offices(ticket.company_id).await?;
    let pick = pick_office(&offices, lat, lon, ticket.city.as_deref())
        .ok_or(AssignError::NoOffices(ticket.company_id))?;

    let pool: Vec<Manager> = storage
        .managers(ticket.company_id)
        .await?
        .into_iter()
        .filter(|m| m.name != BOT_MANAGER_NAME)
        .collect();
    if pool.is_empty() {
        return Err(AssignError::NoManagers(ticket.company_id));
    }
    let pool_size = pool.len();

    let scored: Vec<ScoredManager> = pool
        .iter()
        .map(|m| {
            score_manager(
                m,
                &pick.office,
                &category,
                &language,
                ticket.segment.as_deref(),
            )
        })
        .collect();
    let best = match select_best(scored) {
        Some(best) => best,
        None => return Err(AssignError::NoManagers(ticket.company_id)),
    };

    let distance_km = pick.distance_km.map(|d| d.round() as i64);
    let load_before = best.manager.current_load;

    let steps = vec![
        match distance_km {
            Some(km) => format!("1. Целевой офис: {} (ближайший, {km} км)", pick.office),
            None => format!("1. Целевой офис: {} (по городу/дефолт)", pick.office),
        },
        format!("2. Рассчитаны веса для {pool_size} менеджеров"),
        format!(
            "3. Лучший кандидат: {} с баллом {}",
            best.manager.name, best.score
        ),
        format!("4. Детали скоринга: {}", best.terms.join(", ")),
        format!("5. Итоговая нагрузка: {} -> {}", load_before, load_before + 1),
    ];
    info!(
        "[Assignment] Ticket #{ticket_id} routed:\n{}",
        steps.join("\n")
    );

    let reason = AssignmentReason {
        office: pick.office.clone(),
        distance_km,
        score: best.score,
        terms: best.terms.clone(),
        load_before,
        load_after: load_before + 1,
        steps,
    };

    storage
        .put_assignment(crate::shared::models::NewAssignment {
            ticket_id,
            analysis_id,
            manager_id: best.manager.id,
            office_id: pick.office_id,
            reason: serde_json::to_string(&reason).unwrap_or_default(),
        })
        .await?;
    storage.increment_manager_load(best.manager.id).await?;

    Ok(AssignmentOutcome {
        manager_id: best.manager.id,
        manager_name: best.manager.name.clone(),
        office: pick.office,
        reason,
    })
}

/// Direct assignment to the tenant's automation agent, bypassing scoring.
/// Used for tickets an upstream channel already resolved. Does not touch
/// the load counter.
pub async fn assign_to_bot(
    storage: &dyn Storage,
    ticket_id: i64,
    analysis_id: Option<i64>,
    company_id: i64,
) -> Result<AssignmentOutcome, AssignError> {
    let bot = storage
        .find_manager_by_name(company_id, BOT_MANAGER_NAME)
        .await?
        .ok_or(AssignError::BotMissing(company_id))?;

    let reason = AssignmentReason {
        office: bot.office.clone(),
        distance_km: None,
        score: 0,
        terms: Vec::new(),
        load_before: bot.current_load,
        load_after: bot.current_load,
        steps: vec![
            "Тикет автоматически решён AI ассистентом".to_string(),
            "Назначено на бота.".to_string(),
        ],
    };

    storage
        .put_assignment(crate::shared::models::NewAssignment {
            ticket_id,
            analysis_id,
            manager_id: bot.id,
            office_id: None,
            reason: serde_json::to_string(&reason).unwrap_or_default(),
        })
        .await?;

    Ok(AssignmentOutcome {
        manager_id: bot.id,
        manager_name: bot.name,
        office: bot.office,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office(id: i64, name: &str, coords: Option<(f64, f64)>) -> Office {
        Office {
            id,
            company_id: 1,
            office: name.to_string(),
            address: None,
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
        }
    }

    fn manager(id: i64, name: &str, office: &str, skills: &[&str], load: i32) -> Manager {
        Manager {
            id,
            company_id: 1,
            name: name.to_string(),
            office: office.to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            current_load: load,
        }
    }

    #[test]
    fn nearest_office_wins_when_coords_present() {
        let offices = vec![
            office(1, "Алматы", Some((43.222, 76.8512))),
            office(2, "Астана", Some((51.1801, 71.446))),
        ];
        let pick = pick_office(&offices, Some(43.25), Some(76.9), None).unwrap();
        assert_eq!(pick.office, "Алматы");
        assert!(pick.distance_km.unwrap() < 20.0);
    }

    #[test]
    fn offices_without_coords_borrow_from_the_static_table() {
        // Neither row carries coordinates; both names are branch cities.
        let offices = vec![
            office(1, "Астана", None),
            office(2, "Алматы", None),
        ];
        let pick = pick_office(&offices, Some(43.25), Some(76.9), None).unwrap();
        assert_eq!(pick.office, "Алматы");
        assert!(pick.distance_km.unwrap() < 20.0);

        // Names outside the table still fall through to the first office.
        let offices = vec![office(1, "Головной офис", None)];
        let pick = pick_office(&offices, Some(43.25), Some(76.9), None).unwrap();
        assert_eq!(pick.office, "Головной офис");
        assert_eq!(pick.distance_km, None);
    }

    #[test]
    fn city_substring_match_without_coords() {
        let offices = vec![
            office(1, "AST-1", None),
            office(2, "Офис Алматы", None),
        ];
        let pick = pick_office(&offices, None, None, Some("алматы")).unwrap();
        assert_eq!(pick.office, "Офис Алматы");
        assert_eq!(pick.distance_km, None);
    }

    #[test]
    fn default_office_then_first() {
        let offices = vec![office(1, "Шымкент", None), office(2, "AST-1", None)];
        let pick = pick_office(&offices, None, None, Some("Лондон")).unwrap();
        assert_eq!(pick.office, "AST-1");

        let offices = vec![office(1, "Шымкент", None)];
        let pick = pick_office(&offices, None, None, None).unwrap();
        assert_eq!(pick.office, "Шымкент");
    }

    #[test]
    fn zero_offices_is_none() {
        assert!(pick_office(&[], Some(43.0), Some(76.0), None).is_none());
    }

    #[test]
    fn vip_scenario_scores_match_the_routing_contract() {
        // Agent X: office match, category, language, VIP, load 2 → 190.
        // Agent Y: office match, language only, non-VIP penalty, load 0 → 80.
        let x = manager(1, "X", "A", &["Complaint", "RU", "VIP"], 2);
        let y = manager(2, "Y", "A", &["RU"], 0);

        let sx = score_manager(&x, "A", "Complaint", "RU", Some("VIP"));
        let sy = score_manager(&y, "A", "Complaint", "RU", Some("VIP"));
        assert_eq!(sx.score, 190);
        assert_eq!(sy.score, 80);

        let best = select_best(vec![sy, sx]).unwrap();
        assert_eq!(best.manager.name, "X");
    }

    #[test]
    fn tie_breaks_on_lower_load() {
        let a = manager(1, "A", "X", &[], 3);
        let b = manager(2, "B", "Y", &["RU"], 6);
        // a: -30 load; b: +30 lang -60 load → both -30.
        let sa = score_manager(&a, "Z", "", "RU", None);
        let sb = score_manager(&b, "Z", "", "RU", None);
        assert_eq!(sa.score, sb.score);

        let best = select_best(vec![sb, sa]).unwrap();
        assert_eq!(best.manager.name, "A");
    }

    #[test]
    fn scoring_is_deterministic() {
        let pool = vec![
            manager(1, "A", "Алматы", &["Жалоба"], 1),
            manager(2, "B", "Астана", &["RU", "Жалоба"], 0),
            manager(3, "C", "Алматы", &["RU"], 2),
        ];
        let run = || {
            let scored = pool
                .iter()
                .map(|m| score_manager(m, "Алматы", "Жалоба", "RU", None))
                .collect::<Vec<_>>();
            select_best(scored).unwrap().manager.id
        };
        let first = run();
        for _ in 0..10 {
            assert_eq!(run(), first);
        }
    }

    #[test]
    fn reason_round_trips_through_json() {
        let reason = AssignmentReason {
            office: "Алматы".to_string(),
            distance_km: Some(12),
            score: 130,
            terms: vec!["+100 Office".to_string(), "-20 Load".to_string()],
            load_before: 2,
            load_after: 3,
            steps: vec!["1. ...".to_string()],
        };
        let json = serde_json::to_string(&reason).unwrap();
        let back: AssignmentReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back.score, 130);
        assert_eq!(back.distance_km, Some(12));
    }
}
