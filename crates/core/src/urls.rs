use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

pub fn series_search_url(title: &str) -> String {
    let encoded = utf8_percent_encode(title, NON_ALPHANUMERIC).to_string();
    format!("https://www.themoviedb.org/search/tv?query={encoded}")
}

#[cfg(test)]
mod tests {
    use super::series_search_url;

    #[test]
    fn url_builder_encodes_queries() {
        let url = series_search_url("Cowboy Bebop / Session 5");

        assert!(url.starts_with("https://www.themoviedb.org/search/tv?query="));
        assert!(url.contains("Cowboy%20Bebop%20%2F%20Session%205"));
    }
}
