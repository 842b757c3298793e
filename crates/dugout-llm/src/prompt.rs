// Prompt construction for the coaching advisor.
//
// The advisor sees the batting order, defensive alignment (with how well each
// fielder fits the spot), the bench and any player notes. It offers
// observations and tradeoffs; the coach makes every decision.

use std::collections::{BTreeSet, HashMap};

use dugout_baseball::lineup::{position_fit, FieldAssignment, LineupEngine, LineupSlot, PositionFit};
use dugout_baseball::player::{Player, PlayerStatus};
use dugout_baseball::position::{Position, DEFENSIVE_POSITIONS};
use dugout_baseball::roster::Roster;

use crate::event::{ChatMessage, ChatRequest};

// ---------------------------------------------------------------------------
// System prompt
// ---------------------------------------------------------------------------

/// Return the static system prompt for all advisory calls.
pub fn system_prompt() -> String {
    "You are a coaching perspective assistant for youth baseball.\n\
     You point out patterns and considerations in the coach's lineup and defensive alignment.\n\
     You do NOT make decisions, optimize lineups, or give commands.\n\
     The coach is always the decision-maker.\n\
     Be concise and specific, and highlight tradeoffs when relevant."
        .to_string()
}

// ---------------------------------------------------------------------------
// Lineup context
// ---------------------------------------------------------------------------

/// Borrowed view of everything the advisor is shown.
#[derive(Debug, Clone, Copy)]
pub struct LineupContext<'a> {
    pub players: &'a [Player],
    pub lineup: &'a [LineupSlot],
    pub field: &'a [FieldAssignment],
    pub bench: &'a BTreeSet<String>,
    pub use_dh: bool,
}

impl<'a> LineupContext<'a> {
    pub fn new(roster: &'a Roster, engine: &'a LineupEngine) -> Self {
        let state = engine.state();
        Self {
            players: roster.all(),
            lineup: &state.lineup,
            field: &state.field,
            bench: &state.bench,
            use_dh: state.use_dh,
        }
    }

    fn lookup(&self) -> HashMap<&'a str, &'a Player> {
        self.players.iter().map(|p| (p.id.as_str(), p)).collect()
    }
}

/// Render the current situation as plain-text sections.
pub fn format_situation(ctx: &LineupContext<'_>) -> String {
    let players = ctx.lookup();
    let mut out = String::from("BATTING ORDER:\n");

    let mut slots: Vec<&LineupSlot> = ctx.lineup.iter().collect();
    slots.sort_by_key(|s| s.slot_number);
    for slot in slots {
        match slot.player_id.as_deref().and_then(|id| players.get(id)) {
            Some(p) => out.push_str(&format!(
                "{}. {} ({}/{})\n",
                slot.slot_number,
                p.label(),
                p.bats.display_str(),
                p.throws.display_str()
            )),
            None => out.push_str(&format!("{}. (empty)\n", slot.slot_number)),
        }
    }

    out.push_str("\nDEFENSIVE POSITIONS:\n");
    let mut shown: Vec<Position> = DEFENSIVE_POSITIONS.to_vec();
    if ctx.use_dh {
        shown.push(Position::DesignatedHitter);
    }
    for position in shown {
        let occupant = ctx
            .field
            .iter()
            .find(|f| f.position == position)
            .and_then(|f| f.player_id.as_deref())
            .and_then(|id| players.get(id));
        match occupant {
            Some(p) if position.is_defensive() => out.push_str(&format!(
                "{}: {} ({})\n",
                position,
                p.label(),
                fit_label(position_fit(p, position))
            )),
            Some(p) => out.push_str(&format!("{}: {}\n", position, p.label())),
            None => out.push_str(&format!("{position}: (empty)\n")),
        }
    }
    out.push_str(&format!(
        "Designated hitter: {}\n",
        if ctx.use_dh { "in use" } else { "not in use" }
    ));

    let bench: Vec<String> = ctx
        .bench
        .iter()
        .filter_map(|id| players.get(id.as_str()))
        .map(|p| p.label())
        .collect();
    if !bench.is_empty() {
        out.push_str("\nBENCH:\n");
        for label in bench {
            out.push_str(&format!("{label}\n"));
        }
    }

    let noted: Vec<&Player> = ctx
        .players
        .iter()
        .filter(|p| p.status == PlayerStatus::Active && !p.notes.trim().is_empty())
        .collect();
    if !noted.is_empty() {
        out.push_str("\nPLAYER NOTES:\n");
        for p in noted {
            out.push_str(&format!("{}: {}\n", p.label(), p.notes.trim()));
        }
    }

    out
}

fn fit_label(fit: PositionFit) -> &'static str {
    match fit {
        PositionFit::Primary => "primary",
        PositionFit::Secondary => "secondary",
        PositionFit::OutOfPosition => "out of position",
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Build the user prompt for a one-shot analysis.
pub fn build_analysis_prompt(ctx: &LineupContext<'_>, question: Option<&str>) -> String {
    let mut prompt = format!("CURRENT SITUATION:\n\n{}", format_situation(ctx));
    match question.map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => {
            prompt.push_str(&format!("\nCOACH'S QUESTION:\n{q}\n"));
            prompt.push_str(
                "\nProvide your perspective on the coach's question based on the current situation.",
            );
        }
        None => prompt.push_str(
            "\nProvide observations and considerations about this lineup and defensive alignment.",
        ),
    }
    prompt
}

pub fn analysis_request(
    ctx: &LineupContext<'_>,
    question: Option<&str>,
    max_tokens: u32,
) -> ChatRequest {
    ChatRequest {
        system: system_prompt(),
        messages: vec![ChatMessage::user(build_analysis_prompt(ctx, question))],
        model: None,
        max_tokens,
    }
}

/// System prompt for free-form chat, optionally carrying the current
/// situation so follow-up questions can refer to it.
pub fn chat_system_prompt(ctx: Option<&LineupContext<'_>>) -> String {
    match ctx {
        Some(ctx) => format!(
            "{}\n\nCURRENT SITUATION:\n\n{}",
            system_prompt(),
            format_situation(ctx)
        ),
        None => system_prompt(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
