use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u32);
impl SpanId {
    pub const NONE: SpanId = SpanId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const NONE: Span = Span { file_id: 0, start: 0, end: 0 };

    pub fn extended(&self, other: Span) -> Span {
        Span { file_id: self.file_id, start: self.start, end: other.end.max(self.end) }
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}..{}", self.file_id, self.start, self.end)
    }
}

#[derive(Debug, Clone)]
pub struct Spans {
    spans: Vec<Span>,
}

impl Spans {
    pub fn new() -> Spans {
        Spans { spans: vec![Span::NONE] }
    }

    pub fn add(&mut self, span: Span) -> SpanId {
        let id = self.spans.len();
        self.spans.push(span);
        SpanId(id as u32)
    }

    pub fn get(&self, id: SpanId) -> Span {
        self.spans[id.0 as usize]
    }

    pub fn extend(&mut self, span1: SpanId, span2: SpanId) -> SpanId {
        let span1 = self.get(span1);
        let span2 = self.get(span2);
        self.add(span1.extended(span2))
    }
}

impl Default for Spans {
    fn default() -> Self {
        Self::new()
    }
}
