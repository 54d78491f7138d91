//! 流式文本累积器
//!
//! 逐字符处理文本增量，决定哪些可以立刻输出、哪些属于混入文本的结构化载荷（函数参数 JSON）。
//! `{` 开启试探：其后第一个非空白字符是 `"` 则进入载荷缓冲，直到括号配平后整段丢弃；
//! 缓冲期间跟踪字符串与转义，字符串内的括号不计入深度。其他情况把暂存文本原样放回叙述。

use crate::config::StreamSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// 本段尚未收到文本
    Idle,
    EmittingText,
    /// 见到 `{`，等待判定
    ProbingPayload,
    BufferingPayload,
    /// 本段结束且有待执行的函数调用
    AwaitingToolRound,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    state: AccumulatorState,
    detect_payloads: bool,
    probe_limit: usize,
    held: String,
    probe_whitespace: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    discarded: usize,
}

impl StreamAccumulator {
    pub fn new(settings: &StreamSection) -> Self {
        Self {
            state: AccumulatorState::Idle,
            detect_payloads: settings.detect_payloads,
            probe_limit: settings.probe_limit,
            held: String::new(),
            probe_whitespace: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            discarded: 0,
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// 已丢弃的载荷数
    pub fn discarded_payloads(&self) -> usize {
        self.discarded
    }

    /// 吸收一段文本增量，返回此刻可以输出的叙述文本（可能为空）
    pub fn push(&mut self, chunk: &str) -> String {
        let mut out = String::new();
        if matches!(
            self.state,
            AccumulatorState::AwaitingToolRound | AccumulatorState::Terminated
        ) {
            return out;
        }
        for ch in chunk.chars() {
            self.step(ch, &mut out);
        }
        out
    }

    fn step(&mut self, ch: char, out: &mut String) {
        match self.state {
            AccumulatorState::Idle | AccumulatorState::EmittingText => {
                if self.detect_payloads && ch == '{' {
                    self.state = AccumulatorState::ProbingPayload;
                    self.held.push(ch);
                    self.probe_whitespace = 0;
                } else {
                    self.state = AccumulatorState::EmittingText;
                    out.push(ch);
                }
            }
            AccumulatorState::ProbingPayload => {
                if ch == '"' {
                    self.state = AccumulatorState::BufferingPayload;
                    self.held.push(ch);
                    self.depth = 1;
                    self.in_string = true;
                    self.escaped = false;
                } else if ch.is_whitespace() && self.probe_whitespace < self.probe_limit {
                    self.held.push(ch);
                    self.probe_whitespace += 1;
                } else {
                    // 不是载荷：放回暂存文本，当前字符按普通文本重新处理
                    out.push_str(&self.held);
                    self.held.clear();
                    self.state = AccumulatorState::EmittingText;
                    self.step(ch, out);
                }
            }
            AccumulatorState::BufferingPayload => {
                self.held.push(ch);
                if self.in_string {
                    if self.escaped {
                        self.escaped = false;
                    } else if ch == '\\' {
                        self.escaped = true;
                    } else if ch == '"' {
                        self.in_string = false;
                    }
                    return;
                }
                match ch {
                    '"' => self.in_string = true,
                    '{' => self.depth += 1,
                    '}' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            tracing::debug!(len = self.held.len(), "discarding structured payload from text stream");
                            self.held.clear();
                            self.discarded += 1;
                            self.state = AccumulatorState::EmittingText;
                        }
                    }
                    _ => {}
                }
            }
            AccumulatorState::AwaitingToolRound | AccumulatorState::Terminated => {}
        }
    }

    /// 段结束：试探中的文本作为叙述返回，未配平的载荷丢弃
    pub fn finish_segment(&mut self) -> String {
        let flushed = match self.state {
            AccumulatorState::ProbingPayload => std::mem::take(&mut self.held),
            AccumulatorState::BufferingPayload => {
                tracing::debug!(len = self.held.len(), "discarding unterminated payload at segment end");
                self.held.clear();
                self.discarded += 1;
                String::new()
            }
            _ => String::new(),
        };
        if !matches!(self.state, AccumulatorState::Terminated) {
            self.state = AccumulatorState::Idle;
        }
        self.clear_scan();
        flushed
    }

    pub fn await_tool_round(&mut self) {
        if self.state != AccumulatorState::Terminated {
            self.state = AccumulatorState::AwaitingToolRound;
        }
    }

    /// 工具轮执行完毕，准备接收新一段
    pub fn reset(&mut self) {
        if self.state != AccumulatorState::Terminated {
            self.state = AccumulatorState::Idle;
        }
        self.held.clear();
        self.clear_scan();
    }

    pub fn terminate(&mut self) {
        self.state = AccumulatorState::Terminated;
        self.held.clear();
        self.clear_scan();
    }

    fn clear_scan(&mut self) {
        self.probe_whitespace = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc() -> StreamAccumulator {
        StreamAccumulator::new(&StreamSection::default())
    }

    fn feed(acc: &mut StreamAccumulator, chunks: &[&str]) -> String {
        let mut out: String = chunks.iter().map(|c| acc.push(c)).collect();
        out.push_str(&acc.finish_segment());
        out
    }

    #[test]
    fn test_plain_text_passes_through() {
        let mut a = acc();
        assert_eq!(a.state(), AccumulatorState::Idle);
        assert_eq!(a.push("Hello, "), "Hello, ");
        assert_eq!(a.state(), AccumulatorState::EmittingText);
        assert_eq!(feed(&mut a, &["world."]), "world.");
    }

    #[test]
    fn test_payload_split_across_chunks_is_suppressed() {
        let mut a = acc();
        let chunks = ["Let me check. {", "\"ci", "ty\": \"Par", "is {x}\", \"n\": {\"a\"", ": 1}", "} Done", "!"];
        let out = feed(&mut a, &chunks);
        assert_eq!(out, "Let me check.  Done!");
        assert_eq!(a.discarded_payloads(), 1);
    }

    #[test]
    fn test_escaped_quotes_inside_payload() {
        let mut a = acc();
        let out = feed(&mut a, &[r#"a{"q": "say \"}\" now"}b"#]);
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_brace_without_quote_is_narrative() {
        let mut a = acc();
        assert_eq!(feed(&mut a, &["use {braces} and {", " x}"]), "use {braces} and { x}");
        assert_eq!(feed(&mut a, &["{{\"k\":1}}"]), "{}");
        assert_eq!(a.discarded_payloads(), 1);
    }

    #[test]
    fn test_probe_limit_releases_held_text() {
        let mut a = StreamAccumulator::new(&StreamSection {
            detect_payloads: true,
            probe_limit: 2,
        });
        assert_eq!(feed(&mut a, &["{   \"not payload\"}"]), "{   \"not payload\"}");
    }

    #[test]
    fn test_trailing_probe_flushed_and_unterminated_payload_dropped() {
        let mut a = acc();
        assert_eq!(feed(&mut a, &["tail {"]), "tail {");
        assert_eq!(feed(&mut a, &["x {\"a\": \"open"]), "x ");
        assert_eq!(a.state(), AccumulatorState::Idle);
    }

    #[test]
    fn test_detection_disabled() {
        let mut a = StreamAccumulator::new(&StreamSection {
            detect_payloads: false,
            probe_limit: 16,
        });
        assert_eq!(feed(&mut a, &["{\"a\":1}"]), "{\"a\":1}");
    }

    #[test]
    fn test_awaiting_and_terminated_ignore_text() {
        let mut a = acc();
        a.await_tool_round();
        assert_eq!(a.push("ignored"), "");
        a.reset();
        assert_eq!(a.push("ok"), "ok");
        a.terminate();
        assert_eq!(a.push("late"), "");
        a.reset();
        assert_eq!(a.state(), AccumulatorState::Terminated);
    }
}
