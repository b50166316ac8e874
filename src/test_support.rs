use tokio::sync::Mutex as AsyncMutex;

/// Process-wide lock for tests that touch `RUNWIRE_*` variables.
/// Use `.blocking_lock()` in sync tests and `.lock().await` in async tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Clears a set of environment variables and puts the previous values back on drop.
/// Hold [`ENV_LOCK`] for as long as the guard lives.
pub struct ScopedEnv {
    saved: Vec<(&'static str, Option<String>)>,
}

impl ScopedEnv {
    pub fn cleared(names: &[&'static str]) -> Self {
        let saved = names
            .iter()
            .map(|name| (*name, std::env::var(name).ok()))
            .collect();
        for name in names {
            std::env::remove_var(name);
        }
        Self { saved }
    }

    pub fn set(&mut self, name: &'static str, value: &str) -> &mut Self {
        if !self.saved.iter().any(|(saved, _)| *saved == name) {
            self.saved.push((name, std::env::var(name).ok()));
        }
        std::env::set_var(name, value);
        self
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (name, value) in self.saved.drain(..) {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}
