/// A canned starter question offered on an empty conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestedTopic {
    pub title: &'static str,
    pub query: &'static str,
}

pub const SUGGESTED_TOPICS: &[SuggestedTopic] = &[
    SuggestedTopic {
        title: "Market Analysis",
        query: "Can you analyze the current Indian stock market trends and NIFTY performance?",
    },
    SuggestedTopic {
        title: "SIP Investment",
        query: "What are the best SIP investment strategies for long-term wealth creation?",
    },
    SuggestedTopic {
        title: "Portfolio Review",
        query: "How can I optimize my investment portfolio for better returns?",
    },
    SuggestedTopic {
        title: "Risk Management",
        query: "What are effective risk management strategies for stock investments?",
    },
    SuggestedTopic {
        title: "Tax Planning",
        query: "What are the best tax-saving investment options under Section 80C?",
    },
    SuggestedTopic {
        title: "Stock Picks",
        query: "Can you recommend some promising Indian stocks for investment?",
    },
];

/// Look up a topic by 1-based position or case-insensitive title.
#[must_use]
pub fn find_topic(selector: &str) -> Option<&'static SuggestedTopic> {
    let selector = selector.trim();
    if let Ok(index) = selector.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| SUGGESTED_TOPICS.get(i));
    }
    SUGGESTED_TOPICS
        .iter()
        .find(|topic| topic.title.eq_ignore_ascii_case(selector))
}
