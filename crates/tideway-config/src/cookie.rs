// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstream cookie assembly from ordered token fragments.
//!
//! The upstream is sensitive to cookie ordering, so the fragments are
//! modeled as an ordered list of optionals joined with `"; "`. Missing
//! fragments are omitted silently.

use crate::model::TokensConfig;

/// Suffix observed on the intercom cookie names in live traffic.
const INTERCOM_SUFFIX: &str = "lupk8zyo";

impl TokensConfig {
    /// Assemble the upstream Cookie header value.
    ///
    /// Fragment order is fixed: sessionKey, anthropic-device-id,
    /// cf_clearance, __cf_bm, lastActiveOrg, ajs_anonymous_id, ajs_user_id,
    /// activitySessionId, intercom-device-id-*, intercom-session-*.
    /// Deterministic for a given token block.
    pub fn build_cookie(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut push = |key: String, value: &Option<String>| {
            if let Some(v) = value {
                if !v.is_empty() {
                    parts.push(format!("{key}={v}"));
                }
            }
        };
        push("sessionKey".into(), &self.session_key);
        push("anthropic-device-id".into(), &self.device_id);
        push("cf_clearance".into(), &self.cf_clearance);
        push("__cf_bm".into(), &self.cf_bm);
        push("lastActiveOrg".into(), &self.organization_id);
        push("ajs_anonymous_id".into(), &self.anonymous_id);
        push("ajs_user_id".into(), &self.user_id);
        push("activitySessionId".into(), &self.activity_session_id);
        push(
            format!("intercom-device-id-{INTERCOM_SUFFIX}"),
            &self.intercom_device_id,
        );
        push(
            format!("intercom-session-{INTERCOM_SUFFIX}"),
            &self.intercom_session_id,
        );
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_tokens() -> TokensConfig {
        TokensConfig {
            organization_id: Some("org-1".into()),
            session_key: Some("sk-abc".into()),
            cf_clearance: Some("cfc".into()),
            cf_bm: Some("cfbm".into()),
            device_id: Some("dev-1".into()),
            anonymous_id: Some("anon-1".into()),
            user_id: Some("user-1".into()),
            activity_session_id: Some("act-1".into()),
            intercom_device_id: Some("icd-1".into()),
            intercom_session_id: Some("ics-1".into()),
        }
    }

    #[test]
    fn full_cookie_preserves_fragment_order() {
        let cookie = full_tokens().build_cookie();
        assert_eq!(
            cookie,
            "sessionKey=sk-abc; anthropic-device-id=dev-1; cf_clearance=cfc; \
             __cf_bm=cfbm; lastActiveOrg=org-1; ajs_anonymous_id=anon-1; \
             ajs_user_id=user-1; activitySessionId=act-1; \
             intercom-device-id-lupk8zyo=icd-1; intercom-session-lupk8zyo=ics-1"
        );
    }

    #[test]
    fn missing_fragments_are_omitted_silently() {
        let tokens = TokensConfig {
            session_key: Some("sk-abc".into()),
            organization_id: Some("org-1".into()),
            ..Default::default()
        };
        assert_eq!(tokens.build_cookie(), "sessionKey=sk-abc; lastActiveOrg=org-1");
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let tokens = TokensConfig {
            session_key: Some("sk-abc".into()),
            cf_clearance: Some("".into()),
            ..Default::default()
        };
        assert_eq!(tokens.build_cookie(), "sessionKey=sk-abc");
    }

    #[test]
    fn empty_token_block_yields_empty_cookie() {
        assert_eq!(TokensConfig::default().build_cookie(), "");
    }

    #[test]
    fn assembly_is_deterministic() {
        let tokens = full_tokens();
        assert_eq!(tokens.build_cookie(), tokens.build_cookie());
    }
}
