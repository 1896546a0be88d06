//! Prompt Builder
//!
//! Renders the aggregated knowledge into the text handed to the generator.
//! Sections follow knowledge precedence: owned gear, library-only hardware,
//! instrument guidance, venue corrections, venue-type profile, then history.

use mixplan_common::models::{HistoricalSetup, Location, PerformerRequirement};
use serde_json::Value;
use std::fmt::Write;

use super::knowledge_aggregator::{CorrectionNote, GuidanceSource, KnowledgeContext};

/// Inputs for one generator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
    /// Console and role description (system prompt)
    pub equipment_description: String,
    pub knowledge_context: String,
    pub performer_lineup: String,
    pub history: Option<String>,
}

impl GenerationPrompt {
    pub fn system_prompt(&self) -> &str {
        &self.equipment_description
    }

    /// Venue, lineup, knowledge and history as one request message
    pub fn user_prompt(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.performer_lineup);
        out.push('\n');
        out.push_str(&self.knowledge_context);
        if let Some(history) = &self.history {
            out.push('\n');
            out.push_str(history);
        }
        out.push_str(CLOSING_INSTRUCTIONS);
        out
    }
}

const OUTPUT_FORMAT: &str = r#"
## Response Format

Return one JSON object in a ```json fenced block with these keys:
- channel_config: object keyed by channel number, each {instrument, mic, notes}
- eq_settings: object keyed by channel number, each {hpf, band1, band2, band3, band4}
- compression_settings: object keyed by channel number, each {ratio, threshold, attack, release, makeup_gain, soft_knee}
- fx_settings: object keyed by channel number, each {engine, send_level}
- instructions: step-by-step guide (channel assignment, gain staging, EQ, compression, FX)
- troubleshooting_tips: common issues for this lineup at this venue
"#;

const CLOSING_INSTRUCTIONS: &str = "\n## Instructions\n\
Generate a complete mixer setup for this event. Apply venue corrections and \
instrument corrections from this venue before generic profiles. Learn from \
setups that needed improvement as well as successful ones. \
Return the response as a valid JSON object.\n";

/// Prompt renderer
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    console_description: String,
    history_limit: usize,
}

impl PromptBuilder {
    pub fn new(console_description: impl Into<String>, history_limit: usize) -> Self {
        Self {
            console_description: console_description.into(),
            history_limit,
        }
    }

    pub fn build(
        &self,
        location: &Location,
        performers: &[PerformerRequirement],
        context: &KnowledgeContext,
        refreshing: Option<&HistoricalSetup>,
    ) -> GenerationPrompt {
        GenerationPrompt {
            equipment_description: self.equipment_description(),
            knowledge_context: render_knowledge(context),
            performer_lineup: render_request(location, performers, refreshing),
            history: self.render_history(context),
        }
    }

    fn equipment_description(&self) -> String {
        format!(
            "You are an expert live sound engineer preparing mixing console setups \
             for community and charity events.\n\n## Your Console\n{}\n{}",
            self.console_description.trim(),
            OUTPUT_FORMAT
        )
    }

    fn render_history(&self, context: &KnowledgeContext) -> Option<String> {
        if context.history.is_empty() || self.history_limit == 0 {
            return None;
        }

        let mut out = String::new();
        let successful: Vec<_> = context.successful().take(self.history_limit).collect();
        if !successful.is_empty() {
            out.push_str("## Past Successful Setups at This Venue\n");
            for setup in successful {
                render_setup(&mut out, setup);
            }
        }

        let weak: Vec<_> = context.needs_improvement().take(self.history_limit).collect();
        if !weak.is_empty() {
            out.push_str("\n## Past Setups That Needed Improvement\n");
            for setup in weak {
                render_setup(&mut out, setup);
            }
        }

        Some(out)
    }
}

fn render_request(
    location: &Location,
    performers: &[PerformerRequirement],
    refreshing: Option<&HistoricalSetup>,
) -> String {
    let mut out = String::from("# Setup Request\n\n## Venue Information\n");
    let _ = writeln!(out, "- **Name**: {}", location.name);
    let _ = writeln!(
        out,
        "- **Type**: {}",
        location.venue_type.as_deref().unwrap_or("Not specified")
    );
    let _ = writeln!(out, "- **Notes**: {}", location.notes.as_deref().unwrap_or("None"));
    if let Some(room) = &location.room_notes {
        let _ = writeln!(out, "- **Room**: {}", room);
    }
    render_json_line(&mut out, "Speaker Setup", location.speaker_setup.as_ref());
    render_json_line(&mut out, "LR Graphic EQ Cuts", location.lr_geq_cuts.as_ref());
    render_json_line(&mut out, "Monitor Graphic EQ Cuts", location.monitor_geq_cuts.as_ref());

    if let Some(setup) = refreshing {
        let _ = writeln!(
            out,
            "\nThis regenerates the setup for **{}**; produce fresh technical settings for the same lineup.",
            setup.label()
        );
    }

    out.push_str("\n## Performer Lineup\n");
    for (i, performer) in performers.iter().enumerate() {
        let _ = write!(out, "{}. **{}** (count: {})", i + 1, performer.performer_type, performer.count);
        if let Some(source) = performer.input_source {
            let _ = write!(out, " via {:?}", source);
        }
        if !performer.channel_refs.is_empty() {
            let channels: Vec<String> = performer.channel_refs.iter().map(u32::to_string).collect();
            let _ = write!(out, " on channels {}", channels.join(", "));
        }
        if let Some(notes) = &performer.notes {
            let _ = write!(out, " - {}", notes);
        }
        out.push('\n');
    }
    out
}

fn render_knowledge(context: &KnowledgeContext) -> String {
    let mut out = String::new();

    if !context.gear.is_empty() {
        out.push_str("## Owned Gear\n");
        for gear in &context.gear {
            let _ = write!(
                out,
                "- **{}** ({}): {} available of {} owned",
                gear.display_name, gear.kind, gear.quantity_available, gear.quantity_owned
            );
            if gear.quantity_on_loan > 0 {
                let _ = write!(out, ", {} on loan", gear.quantity_on_loan);
            }
            out.push('\n');
            if let Some(settings) = gear.effective_settings() {
                let _ = writeln!(out, "  - Settings for this unit: {}", compact(settings));
            }
            if let Some(characteristics) = gear.library.as_ref().and_then(|l| l.characteristics.as_deref()) {
                let _ = writeln!(out, "  - Characteristics: {}", characteristics);
            }
            if let Some(notes) = &gear.notes {
                let _ = writeln!(out, "  - Notes: {}", notes);
            }
        }
        out.push('\n');
    }

    if !context.knowledge_library.is_empty() {
        out.push_str("## Other Known Hardware\n");
        for entry in &context.knowledge_library {
            let _ = write!(out, "- **{} {}** ({})", entry.brand, entry.model, entry.hardware_type);
            if let Some(best_for) = &entry.best_for {
                let _ = write!(out, ": best for {}", best_for);
            }
            out.push('\n');
            if let Some(characteristics) = &entry.characteristics {
                let _ = writeln!(out, "  - Characteristics: {}", characteristics);
            }
            if let Some(settings) = &entry.settings_by_source {
                let _ = writeln!(out, "  - Settings by source: {}", compact(settings));
            }
        }
        out.push('\n');
    }

    let guided: Vec<_> = context
        .instrument_profiles
        .iter()
        .filter(|g| g.source() != GuidanceSource::None)
        .collect();
    if !guided.is_empty() {
        out.push_str("## Instrument Guidance\n");
        for guidance in guided {
            let _ = writeln!(out, "### {}", guidance.display_name);
            for note in &guidance.location_corrections {
                render_correction(&mut out, note);
            }
            if let Some(profile) = &guidance.profile {
                let label = if guidance.location_corrections.is_empty() {
                    "Profile"
                } else {
                    "Generic profile (corrections above take priority)"
                };
                let _ = writeln!(out, "- {}: {}", label, profile.name);
                render_json_line(&mut out, "Mics", profile.mic_recommendations.as_ref());
                render_json_line(&mut out, "EQ", profile.eq_settings.as_ref());
                render_json_line(&mut out, "Compression", profile.compression_settings.as_ref());
                render_json_line(&mut out, "FX", profile.fx_recommendations.as_ref());
                if let Some(notes) = &profile.mixing_notes {
                    let _ = writeln!(out, "  - Mixing notes: {}", notes);
                }
            }
        }
        out.push('\n');
    }

    if !context.venue_corrections.is_empty() {
        out.push_str("## Corrections Logged at This Venue\n");
        for note in &context.venue_corrections {
            render_correction(&mut out, note);
        }
        out.push('\n');
    }

    if let Some(profile) = &context.venue_profile {
        let _ = writeln!(out, "## Venue Type: {}", profile.name);
        if let Some(description) = &profile.description {
            let _ = writeln!(out, "{}", description);
        }
        render_json_line(&mut out, "Acoustics", profile.acoustic_characteristics.as_ref());
        render_json_line(&mut out, "EQ strategy", profile.eq_strategy.as_ref());
        render_json_line(&mut out, "FX approach", profile.fx_approach.as_ref());
        render_json_line(&mut out, "Compression", profile.compression_philosophy.as_ref());
        if let Some(monitoring) = &profile.monitoring_notes {
            let _ = writeln!(out, "- **Monitoring**: {}", monitoring);
        }
        if let Some(special) = &profile.special_considerations {
            let _ = writeln!(out, "- **Special considerations**: {}", special);
        }
        out.push('\n');
    }

    out
}

fn render_setup(out: &mut String, setup: &HistoricalSetup) {
    let _ = writeln!(
        out,
        "\n### {} (Rating: {}/5)",
        setup.label(),
        setup.rating.map_or_else(|| "?".to_string(), |r| r.to_string())
    );
    let lineup: Vec<String> = setup
        .performers
        .iter()
        .map(|p| format!("{} x{}", p.performer_type, p.count))
        .collect();
    let _ = writeln!(out, "- **Performers**: {}", lineup.join(", "));
    if let Some(notes) = &setup.notes {
        let _ = writeln!(out, "- **Notes**: {}", notes);
    }
    if !setup.corrections.is_empty() {
        let _ = writeln!(out, "- **Corrections logged**: {}", setup.corrections.len());
    }
}

fn render_correction(out: &mut String, note: &CorrectionNote) {
    let _ = write!(
        out,
        "- Channel {} at {} (rated {}/5):",
        note.channel, note.setup_label, note.rating
    );
    let entry = &note.entry;
    if let Some(gain) = &entry.gain_change {
        let _ = write!(out, " gain {};", gain);
    }
    for (label, value) in [
        ("EQ", entry.eq_changes.as_ref()),
        ("compression", entry.compression_changes.as_ref()),
        ("FX", entry.fx_changes.as_ref()),
    ] {
        if let Some(value) = value {
            let _ = write!(out, " {} {};", label, compact(value));
        }
    }
    if let Some(notes) = &entry.notes {
        let _ = write!(out, " {}", notes);
    }
    out.push('\n');
}

fn render_json_line(out: &mut String, label: &str, value: Option<&Value>) {
    if let Some(value) = value {
        let _ = writeln!(out, "- **{}**: {}", label, compact(value));
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
