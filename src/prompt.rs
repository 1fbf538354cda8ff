use anyhow::{anyhow, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Produces prompt strings on demand: a fixed list reused cyclically when
/// the requested sample size exceeds its length, or a generator invoked once
/// per requested prompt.
pub enum PromptSource {
    Fixed(Vec<String>),
    Generator(Box<dyn FnMut() -> String + Send>),
}

impl PromptSource {
    pub fn fixed(prompts: Vec<String>) -> Self {
        Self::Fixed(prompts)
    }

    pub fn generator(make: impl FnMut() -> String + Send + 'static) -> Self {
        Self::Generator(Box::new(make))
    }

    /// Template-based generator producing short varied prompts.
    pub fn generated() -> Self {
        Self::generator(generate_prompt)
    }

    pub fn take(&mut self, count: usize) -> Result<Vec<String>> {
        match self {
            Self::Fixed(prompts) => {
                if prompts.is_empty() {
                    return Err(anyhow!("prompt list is empty"));
                }
                Ok((0..count).map(|i| prompts[i % prompts.len()].clone()).collect())
            }
            Self::Generator(make) => Ok((0..count).map(|_| make()).collect()),
        }
    }
}

const TEMPLATES: &[&str] = &[
    "What does this word mean? {word}",
    "Define {word} in one sentence.",
    "Explain '{word}' to a five-year-old.",
    "Give two plain-English synonyms for {word}.",
    "Use {word} in a short sentence.",
    "Write a haiku using the word '{word}'",
    "Summarize {word} in plain language.",
    "What is a simple mistake to avoid with {word}?",
    "Where does a {animal} usually live?",
    "What does a {animal} typically eat?",
    "Is the {animal} a carnivore?",
    "Give three tips for a {profession}.",
    "List a few tools a {profession} uses.",
    "What is one challenge a {profession} often faces?",
];

const WORDS: &[&str] = &[
    "ledger", "harbor", "thimble", "quorum", "lantern", "furrow", "brine", "parable", "ballast",
    "mosaic", "tundra", "ember", "sextant", "gossamer", "rampart",
];

const ANIMALS: &[&str] = &[
    "bear", "cat", "cow", "dog", "horse", "lion", "rabbit", "snake", "otter", "heron",
];

const PROFESSIONS: &[&str] = &[
    "carpenter", "nurse", "pilot", "librarian", "welder", "chef", "surveyor", "beekeeper",
];

/// Fills one random template and appends a random bracketed tag so repeated
/// prompts are never byte-identical upstream.
pub fn generate_prompt() -> String {
    let mut rng = rand::thread_rng();

    let template = TEMPLATES[rng.gen_range(0..TEMPLATES.len())];
    let mut prompt = template
        .replace("{word}", WORDS[rng.gen_range(0..WORDS.len())])
        .replace("{animal}", ANIMALS[rng.gen_range(0..ANIMALS.len())])
        .replace("{profession}", PROFESSIONS[rng.gen_range(0..PROFESSIONS.len())]);

    let tag_len = rng.gen_range(2..=15);
    let tag: String = (&mut rng)
        .sample_iter(Alphanumeric)
        .take(tag_len)
        .map(char::from)
        .collect();
    prompt.push_str(&format!("\n[{}]", tag));

    prompt
}
