use std::borrow::Cow;

/// The parts of an outbound API request that rules match against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    /// Decoded query parameters, in request order. Repeated names appear repeatedly.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Parses a relative URL such as `/users?limit=5&offset=10#frag`.
    ///
    /// Names and values are percent-decoded (`+` as space); undecodable text is kept raw.
    pub fn parse(method: impl Into<String>, relative_url: &str) -> Self {
        let without_fragment = relative_url
            .split_once('#')
            .map_or(relative_url, |(before, _)| before);
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, query),
            None => (without_fragment, ""),
        };
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(name), decode_component(value))
            })
            .collect();
        Self {
            method: method.into(),
            path: path.to_string(),
            query,
            headers: Vec::new(),
        }
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Distinct query parameter names, in first-seen order.
    pub fn query_param_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.query {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced).map(Cow::into_owned) {
        Ok(decoded) => decoded,
        Err(_) => spaced,
    }
}
