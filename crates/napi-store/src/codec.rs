// ── Set codec ──
//
// Multi-valued indexed fields are stored as one delimited string,
// `",a,b,"`, so a substring filter `(field=*,a,*)` matches membership.

/// Encode members as `",a,b,"`. An empty set encodes to `",,"`.
pub fn encode_set<I, T>(members: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut out = String::from(",");
    for member in members {
        out.push_str(member.as_ref());
        out.push(',');
    }
    if out.len() == 1 {
        out.push(',');
    }
    out
}

/// Decode a stored set. `",,"` and the empty string mean "absent".
pub fn decode_set(stored: &str) -> Option<Vec<String>> {
    let inner = stored.strip_prefix(',').unwrap_or(stored);
    let inner = inner.strip_suffix(',').unwrap_or(inner);

    let members: Vec<String> = inner
        .split(',')
        .filter(|m| !m.is_empty())
        .map(str::to_owned)
        .collect();

    if members.is_empty() { None } else { Some(members) }
}

/// Filter pattern that matches records whose set contains `member`.
pub fn set_member_pattern(member: &str) -> String {
    format!("*,{member},*")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encodes_with_surrounding_delimiters() {
        assert_eq!(encode_set(["a", "b"]), ",a,b,");
        assert_eq!(encode_set(["external"]), ",external,");
    }

    #[test]
    fn decode_inverts_encode() {
        let members = vec!["admin".to_owned(), "external".to_owned()];
        assert_eq!(decode_set(&encode_set(&members)), Some(members));
    }

    #[test]
    fn empty_forms_decode_to_absent() {
        assert_eq!(encode_set(Vec::<String>::new()), ",,");
        assert_eq!(decode_set(",,"), None);
        assert_eq!(decode_set(""), None);
    }

    #[test]
    fn member_pattern_matches_only_whole_members() {
        use crate::filter::Filter;
        use serde_json::json;

        let record = json!({ "nic_tags_provided": ",admin,external," });
        let hit = Filter::eq("nic_tags_provided", set_member_pattern("admin"));
        let miss = Filter::eq("nic_tags_provided", set_member_pattern("adm"));
        assert!(hit.matches(&record));
        assert!(!miss.matches(&record));
    }
}
