use super::types::Platform;

const DEFAULT_PATTERNS: &[(Platform, &[&str])] = &[
    (Platform::Tiktok, &["tiktok.com", "vm.tiktok.com"]),
    (Platform::Youtube, &["youtube.com", "youtu.be"]),
    (Platform::Instagram, &["instagram.com", "instagr.am"]),
    (Platform::Facebook, &["facebook.com", "fb.watch", "fb.com"]),
    (Platform::Twitter, &["twitter.com", "x.com"]),
    (Platform::Reddit, &["reddit.com", "redd.it"]),
];

/// Maps URLs to platforms by hostname substring. First match in table order
/// wins.
#[derive(Debug, Clone)]
pub struct PlatformClassifier {
    table: Vec<(Platform, Vec<String>)>,
}

impl Default for PlatformClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_PATTERNS
                .iter()
                .map(|(platform, patterns)| {
                    (*platform, patterns.iter().map(|p| p.to_string()).collect())
                })
                .collect(),
        )
    }
}

impl PlatformClassifier {
    pub fn new(table: Vec<(Platform, Vec<String>)>) -> Self {
        Self { table }
    }

    pub fn classify(&self, url: &str) -> Platform {
        let url = url.to_lowercase();
        self.table
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| url.contains(p.as_str())))
            .map(|(platform, _)| *platform)
            .unwrap_or(Platform::Unknown)
    }

    #[cfg(test)]
    pub fn patterns(&self, platform: Platform) -> &[String] {
        self.table
            .iter()
            .find(|(p, _)| *p == platform)
            .map(|(_, patterns)| patterns.as_slice())
            .unwrap_or(&[])
    }
}
