//! Hot reload: watch a script file and swap the active pattern on change
//!
//! The watcher polls the file's modification time, re-evaluates it through a
//! host-supplied evaluator and installs the result. An evaluation error is
//! logged and the previous pattern keeps playing.

use crate::control::ControlMap;
use crate::cyclist::PatternSlot;
use crate::pattern::Pattern;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{error, info};

/// How the host turns script text into a pattern.
pub type EvalResult = Result<Pattern<ControlMap>, Box<dyn std::error::Error>>;

/// Blocking watch loop. Evaluates the file once up front, then re-evaluates
/// whenever its modification time changes.
pub fn watch(
    path: PathBuf,
    slot: PatternSlot,
    evaluate: impl Fn(&str) -> EvalResult,
) {
    let mut last_modified: Option<SystemTime> = None;
    loop {
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        if modified != last_modified {
            last_modified = modified;
            reload(&path, &slot, &evaluate);
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// Spawn the watch loop on its own thread.
pub fn spawn_watcher(
    path: PathBuf,
    slot: PatternSlot,
    evaluate: impl Fn(&str) -> EvalResult + Send + 'static,
) -> thread::JoinHandle<()> {
    thread::spawn(move || watch(path, slot, evaluate))
}

fn reload(path: &PathBuf, slot: &PatternSlot, evaluate: &impl Fn(&str) -> EvalResult) {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot read {}: {}", path.display(), e);
            return;
        }
    };
    match evaluate(&source) {
        Ok(pattern) => {
            *slot.lock().unwrap() = Some(pattern);
            info!("reloaded {}", path.display());
        }
        Err(e) => {
            // Keep whatever was playing before.
            error!("evaluation failed for {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern_ops::parse_sound_pattern;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_reload_installs_pattern() {
        let path = std::env::temp_dir().join("ostinato_live_ok.txt");
        std::fs::write(&path, "bd hh sd hh").unwrap();
        let slot: PatternSlot = Arc::new(Mutex::new(None));
        reload(&path, &slot, &|src| {
            parse_sound_pattern(src.trim()).map_err(|e| e.into())
        });
        assert!(slot.lock().unwrap().is_some());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_failed_eval_keeps_previous() {
        let path = std::env::temp_dir().join("ostinato_live_bad.txt");
        std::fs::write(&path, "bd [unclosed").unwrap();
        let slot: PatternSlot = Arc::new(Mutex::new(Some(Pattern::silence())));
        reload(&path, &slot, &|src| {
            parse_sound_pattern(src.trim()).map_err(|e| e.into())
        });
        assert!(
            slot.lock().unwrap().is_some(),
            "the old pattern keeps playing after a bad edit"
        );
        std::fs::remove_file(&path).ok();
    }
}
