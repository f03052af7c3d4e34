use std::collections::BTreeMap;

use maud::{html, Markup, Render};

/// The user's attributes as a claim / value table
pub struct ProfileClaims<'a> {
    profile: &'a BTreeMap<String, String>,
}

impl<'a> ProfileClaims<'a> {
    pub fn new(profile: &'a BTreeMap<String, String>) -> Self {
        Self { profile }
    }
}

impl Render for ProfileClaims<'_> {
    fn render(&self) -> Markup {
        html! {
            @if self.profile.is_empty() {
                p class="text-gray-600" { "No profile information is available. Are you logged in?" }
            } @else {
                table class="w-full text-left" {
                    thead {
                        tr {
                            th class="py-2 pr-4" { "Claim" }
                            th class="py-2" { "Value" }
                        }
                    }
                    tbody {
                        @for (claim, value) in self.profile {
                            tr class="border-t border-gray-100" {
                                td class="py-2 pr-4 font-mono text-sm" id={"claim-" (claim)} { (claim) }
                                td class="py-2 break-all" { (value) }
                            }
                        }
                    }
                }
            }
        }
    }
}
