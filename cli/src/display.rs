//! Rendering helpers for untrusted model output.

use std::borrow::Cow;
use std::fmt::Write;
use std::iter::Peekable;
use std::str::Chars;

use fintech_engine::StructuredAnalysis;

const ESC: char = '\x1b';
const BEL: char = '\x07';
/// Single-character CSI introducer (C1 form of `ESC [`).
const CSI: char = '\u{9b}';

fn is_kept_control(c: char) -> bool {
    matches!(c, '\n' | '\t')
}

/// Strips terminal escape sequences (CSI, OSC, DCS/PM/APC and short `ESC x`
/// forms) and every other control character, so model output cannot drive the
/// terminal. Newlines and tabs survive.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| c.is_control() && !is_kept_control(c)) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ESC => skip_escape(&mut chars),
            CSI => skip_csi(&mut chars),
            c if c.is_control() && !is_kept_control(c) => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Consumes the rest of a sequence whose `ESC` was already read.
fn skip_escape(chars: &mut Peekable<Chars<'_>>) {
    let Some(&next) = chars.peek() else {
        return;
    };
    match next {
        '[' => {
            chars.next();
            skip_csi(chars);
        }
        ']' => {
            chars.next();
            skip_string(chars, true);
        }
        'P' | '^' | '_' => {
            chars.next();
            skip_string(chars, false);
        }
        '(' | ')' | '*' | '+' | '#' | ' ' => {
            chars.next();
            chars.next();
        }
        '7' | '8' | 'c' | 'D' | 'E' | 'H' | 'M' | 'N' | 'O' | 'Z' | '=' | '>' | '<' => {
            chars.next();
        }
        _ => {}
    }
}

/// Parameter and intermediate bytes up to and including the final byte.
fn skip_csi(chars: &mut Peekable<Chars<'_>>) {
    while let Some(&c) = chars.peek() {
        if ('\x40'..='\x7e').contains(&c) {
            chars.next();
            return;
        }
        if !('\x20'..='\x3f').contains(&c) {
            return;
        }
        chars.next();
    }
}

/// Runs to the string terminator `ESC \\` (or `BEL` for OSC).
fn skip_string(chars: &mut Peekable<Chars<'_>>, bel_terminates: bool) {
    while let Some(c) = chars.next() {
        if c == BEL && bel_terminates {
            return;
        }
        if c == ESC && chars.peek() == Some(&'\\') {
            chars.next();
            return;
        }
    }
}

pub fn render_analysis(analysis: &StructuredAnalysis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Summary: {}", sanitize(analysis.summary()));
    let _ = writeln!(out, "\n{}", sanitize(analysis.analysis()));

    if !analysis.recommendations().is_empty() {
        out.push_str("\nRecommendations:\n");
        for (i, rec) in analysis.recommendations().iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {} [risk: {}]\n     {}",
                i + 1,
                sanitize(rec.action()),
                sanitize(rec.risk_level()),
                sanitize(rec.reason())
            );
        }
    }

    if let Some(outlook) = analysis.market_outlook() {
        let _ = writeln!(out, "\nOutlook: {}", sanitize(outlook));
    }

    let _ = write!(out, "\n{}", sanitize(analysis.disclaimer()));
    out
}
