//! Usage: Mandatory system-prompt preamble injection.

use crate::models::claude::{MessagesRequest, SystemBlock, SystemPrompt};

pub const CLAUDE_CODE_PREAMBLE: &str =
    "You are Claude Code, Anthropic's official CLI for Claude.";

/// Ensure the system prompt is a block list whose first element is the
/// mandatory preamble, without ever duplicating it. Idempotent.
pub(crate) fn inject_preamble(request: &mut MessagesRequest) {
    let preamble = SystemBlock::text(CLAUDE_CODE_PREAMBLE);

    match request.system.take() {
        Some(SystemPrompt::Text(text)) if !text.is_empty() => {
            request.system = Some(SystemPrompt::Blocks(vec![preamble, SystemBlock::text(text)]));
        }
        Some(SystemPrompt::Blocks(blocks)) if !blocks.is_empty() => {
            if blocks[0].text == CLAUDE_CODE_PREAMBLE {
                request.system = Some(SystemPrompt::Blocks(blocks));
            } else {
                let mut out = Vec::with_capacity(blocks.len() + 1);
                out.push(preamble);
                out.extend(blocks);
                request.system = Some(SystemPrompt::Blocks(out));
            }
        }
        _ => {
            request.system = Some(SystemPrompt::Blocks(vec![preamble]));
        }
    }
}
