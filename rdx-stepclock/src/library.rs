//! Built-in step definition tables.
//!
//! Plain data for the guided practices that ship with the crate. Hosts can
//! add their own through the configuration file; a configured sequence with
//! the same id shadows the built-in one.

use crate::sequence::{Sequence, Step, StepPayload};

fn step(id: &str, duration_ms: u64, pairs: &[(&str, &str)]) -> Step {
    let payload = pairs
        .iter()
        .fold(StepPayload::new(), |p, (k, v)| p.with(*k, *v));
    Step::new(id, duration_ms).with_payload(payload)
}

fn meditation() -> Sequence {
    Sequence::new(
        "meditation",
        "Guided meditation",
        vec![
            step(
                "settle",
                60_000,
                &[
                    ("title", "Settle in"),
                    ("guidance", "Find a comfortable seat and close your eyes."),
                ],
            ),
            step(
                "breath",
                120_000,
                &[
                    ("title", "Follow the breath"),
                    ("guidance", "Notice each inhale and each exhale."),
                ],
            ),
            step(
                "stillness",
                240_000,
                &[
                    ("title", "Rest in stillness"),
                    ("guidance", "Let thoughts pass like clouds."),
                ],
            ),
            step(
                "return",
                60_000,
                &[
                    ("title", "Return"),
                    ("guidance", "Slowly bring awareness back to the room."),
                ],
            ),
        ],
    )
}

fn ritual() -> Sequence {
    Sequence::new(
        "ritual",
        "Morning ritual",
        vec![
            step(
                "opening",
                30_000,
                &[
                    ("title", "Opening"),
                    ("affirmation", "I open this space with gratitude."),
                ],
            ),
            step(
                "invocation",
                45_000,
                &[
                    ("title", "Invocation"),
                    ("affirmation", "I welcome guidance and clarity."),
                ],
            ),
            step(
                "affirmation",
                60_000,
                &[
                    ("title", "Affirmation"),
                    ("affirmation", "I am grounded, calm and protected."),
                ],
            ),
            step(
                "closing",
                30_000,
                &[
                    ("title", "Closing"),
                    ("affirmation", "I carry this peace into my day."),
                ],
            ),
        ],
    )
}

fn shield() -> Sequence {
    Sequence::new(
        "shield",
        "Layered shield activation",
        vec![
            step(
                "root",
                20_000,
                &[
                    ("title", "Root layer"),
                    ("visualization", "A deep red glow anchors you to the earth."),
                ],
            ),
            step(
                "light",
                20_000,
                &[
                    ("title", "Light layer"),
                    ("visualization", "White light surrounds your body."),
                ],
            ),
            step(
                "mirror",
                20_000,
                &[
                    ("title", "Mirror layer"),
                    ("visualization", "A reflective surface returns what is not yours."),
                ],
            ),
            step(
                "seal",
                15_000,
                &[
                    ("title", "Seal"),
                    ("visualization", "The layers fuse into a single shield."),
                ],
            ),
        ],
    )
}

fn warfare() -> Sequence {
    Sequence::new(
        "warfare",
        "Spiritual warfare",
        vec![
            step("preparation", 30_000, &[("title", "Preparation")]),
            step("engagement", 90_000, &[("title", "Engagement")]),
            step("declaration", 45_000, &[("title", "Declaration")]),
            step("restoration", 45_000, &[("title", "Restoration")]),
        ],
    )
}

/// Every built-in sequence, in a stable order.
pub fn builtin() -> Vec<Sequence> {
    vec![meditation(), ritual(), shield(), warfare()]
}

/// Looks up a built-in sequence by id.
pub fn find(id: &str) -> Option<Sequence> {
    builtin().into_iter().find(|s| s.id.as_str() == id)
}
