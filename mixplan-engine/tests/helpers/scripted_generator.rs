//! In-process stand-in for the external generator

use async_trait::async_trait;
use mixplan_engine::services::{GeneratorError, GeneratorOutput, SetupGenerator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What the generator does when called
#[derive(Debug, Clone)]
pub enum Script {
    Respond(String),
    /// Sleep, then respond
    Slow(Duration, String),
    Fail(String),
}

pub struct ScriptedGenerator {
    script: Script,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts received, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SetupGenerator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, _system: &str, user: &str) -> Result<GeneratorOutput, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user.to_string());

        match &self.script {
            Script::Respond(text) => Ok(GeneratorOutput {
                text: text.clone(),
                elapsed: Duration::from_millis(5),
            }),
            Script::Slow(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(GeneratorOutput {
                    text: text.clone(),
                    elapsed: *delay,
                })
            }
            Script::Fail(message) => Err(GeneratorError::Api(503, message.clone())),
        }
    }
}

/// Well-formed generator reply wrapped in a json fence
pub fn structured_response() -> String {
    r#"Here is the setup.

```json
{
  "channel_config": {"1": {"instrument": "vocal", "mic": "SM58"}, "2": {"instrument": "tabla", "mic": "SM57"}},
  "eq_settings": {"1": {"hpf": "100 Hz"}},
  "compression_settings": {"1": {"ratio": "3:1"}},
  "fx_settings": {"1": {"engine": "plate", "send_level": "-12 dB"}},
  "instructions": "Set gain on channel 1 first.",
  "troubleshooting_tips": ["Watch for feedback near the stage monitors"]
}
```
"#
    .to_string()
}

/// Learned-hardware reply in the shape the learner asks for
pub fn hardware_response() -> String {
    r####"```json
{
  "characteristics": "Supercardioid dynamic with a presence lift",
  "best_for": ["Lead vocals", "Loud stages"],
  "settings_by_source": {"female_vocal": {"hpf": "120 Hz"}},
  "knowledge_base_entry": "### Shure Beta 58A\nTight pattern, good gain before feedback."
}
```"####
        .to_string()
}

/// Learned-profile reply usable for instruments and venue types
pub fn profile_response() -> String {
    r#"Sure.
```json
{
  "description": "Warm and resonant",
  "eq_settings": {"hpf": {"frequency": 80, "enabled": true}},
  "compression_settings": {"ratio": "3:1"},
  "acoustic_characteristics": {"natural_reverb_character": "Long"},
  "sound_goals": {"primary_goal": "Speech clarity"},
  "mixing_notes": "Keep it under the lead vocal."
}
```"#
        .to_string()
}
