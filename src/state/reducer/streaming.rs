use super::super::run_state::{TextMessage, ToolCall, ToolCallStatus};
use super::state::{Fold, Notice};
use serde_json::Value;

const DEFAULT_ROLE: &str = "assistant";

impl Fold<'_> {
    pub(super) fn text_message_start(&mut self, message_id: &str, role: Option<&str>) {
        self.resume_if_paused();
        if self.state.message(message_id).is_some() {
            self.ignore(format!("message {message_id} was already opened"));
            return;
        }
        self.state.messages.push(TextMessage {
            message_id: message_id.to_string(),
            role: role.unwrap_or(DEFAULT_ROLE).to_string(),
            content: String::new(),
            complete: false,
        });
    }

    pub(super) fn text_message_content(&mut self, message_id: &str, content: &str) {
        self.resume_if_paused();
        let index = self.open_message(message_id);
        let message = &mut self.state.messages[index];
        if message.complete {
            self.ignore(format!("content for message {message_id} after its END"));
            return;
        }
        message.content.push_str(content);
    }

    pub(super) fn text_message_end(&mut self, message_id: &str, full_content: Option<&str>) {
        self.resume_if_paused();
        let index = self.open_message(message_id);
        if self.state.messages[index].complete {
            self.ignore(format!("message {message_id} already ended"));
            return;
        }

        if let Some(reported) = full_content {
            let accumulated = &self.state.messages[index].content;
            if accumulated != reported {
                tracing::warn!(
                    message_id,
                    accumulated_len = accumulated.len(),
                    reported_len = reported.len(),
                    "streamed content disagrees with fullContent; keeping fullContent"
                );
                let notice = Notice::ContentMismatch {
                    message_id: message_id.to_string(),
                    accumulated: accumulated.clone(),
                    reported: reported.to_string(),
                };
                self.notices.push(notice);
                self.state.messages[index].content = reported.to_string();
            }
        }
        self.state.messages[index].complete = true;
    }

    /// Index of the buffer for `message_id`, opening one when START never arrived.
    fn open_message(&mut self, message_id: &str) -> usize {
        if let Some(index) = self
            .state
            .messages
            .iter()
            .position(|message| message.message_id == message_id)
        {
            return index;
        }
        self.repair(format!("message {message_id} had no TEXT_MESSAGE_START"));
        self.state.messages.push(TextMessage {
            message_id: message_id.to_string(),
            role: DEFAULT_ROLE.to_string(),
            content: String::new(),
            complete: false,
        });
        self.state.messages.len() - 1
    }

    pub(super) fn tool_call_start(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        parent_message_id: Option<&str>,
    ) {
        self.resume_if_paused();
        if let Some(call) = self
            .state
            .tool_calls
            .iter_mut()
            .find(|call| call.tool_call_id == tool_call_id)
        {
            // ARGS may have opened the call before START told us its name.
            if call.tool_name.is_empty() && call.status == ToolCallStatus::Streaming {
                call.tool_name = tool_name.to_string();
                call.parent_message_id = parent_message_id.map(str::to_string);
            } else {
                self.ignore(format!("tool call {tool_call_id} was already started"));
            }
            return;
        }
        self.state
            .tool_calls
            .push(new_tool_call(tool_call_id, tool_name, parent_message_id));
    }

    pub(super) fn tool_call_args(&mut self, tool_call_id: &str, delta: &str) {
        self.resume_if_paused();
        let index = match self.tool_call_index(tool_call_id) {
            Some(index) => index,
            None => {
                self.anomaly(tool_call_id, "arguments arrived before TOOL_CALL_START");
                let mut call = new_tool_call(tool_call_id, "", None);
                call.anomaly = Some("arguments arrived before TOOL_CALL_START".to_string());
                self.state.tool_calls.push(call);
                self.state.tool_calls.len() - 1
            }
        };
        let call = &mut self.state.tool_calls[index];
        if call.status == ToolCallStatus::Completed {
            self.ignore(format!("arguments for tool call {tool_call_id} after its END"));
            return;
        }
        call.arguments.push_str(delta);
    }

    pub(super) fn tool_call_end(&mut self, tool_call_id: &str, result: Option<&Value>) {
        self.resume_if_paused();
        let Some(index) = self.tool_call_index(tool_call_id) else {
            self.anomaly(tool_call_id, "TOOL_CALL_END without TOOL_CALL_START");
            let mut call = new_tool_call(tool_call_id, "", None);
            call.status = ToolCallStatus::Completed;
            call.result = result.cloned();
            call.anomaly = Some("ended without a start".to_string());
            self.state.tool_calls.push(call);
            return;
        };

        let call = &mut self.state.tool_calls[index];
        if call.status == ToolCallStatus::Completed {
            self.ignore(format!("tool call {tool_call_id} already ended"));
            return;
        }
        call.status = ToolCallStatus::Completed;
        call.result = result.cloned();
        if !call.arguments.trim().is_empty() {
            call.parsed_arguments = serde_json::from_str(&call.arguments).ok();
        }
    }

    fn tool_call_index(&self, tool_call_id: &str) -> Option<usize> {
        self.state
            .tool_calls
            .iter()
            .position(|call| call.tool_call_id == tool_call_id)
    }

    fn anomaly(&mut self, tool_call_id: &str, detail: &str) {
        tracing::warn!(tool_call_id, detail, "tool call sequence anomaly");
        self.notices.push(Notice::ToolCallAnomaly {
            tool_call_id: tool_call_id.to_string(),
            detail: detail.to_string(),
        });
    }
}

fn new_tool_call(tool_call_id: &str, tool_name: &str, parent_message_id: Option<&str>) -> ToolCall {
    ToolCall {
        tool_call_id: tool_call_id.to_string(),
        tool_name: tool_name.to_string(),
        parent_message_id: parent_message_id.map(str::to_string),
        arguments: String::new(),
        parsed_arguments: None,
        status: ToolCallStatus::Streaming,
        result: None,
        anomaly: None,
    }
}
