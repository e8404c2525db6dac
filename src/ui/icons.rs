//! Shared UI icons and emojis.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");

// Connection indicators
pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "[ON]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[..]");

// Phase indicators
pub static UPLOAD: Emoji<'_, '_> = Emoji("📤 ", "");
pub static INGEST: Emoji<'_, '_> = Emoji("📚 ", "");
pub static DEPLOY: Emoji<'_, '_> = Emoji("🚀 ", "");
