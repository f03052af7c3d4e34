use maud::{html, Markup, Render, DOCTYPE};

pub struct Page {
    pub title: String,
    pub is_authenticated: bool,
    pub head: Option<Markup>,
    pub content: Box<dyn Render>,
}

impl Page {
    pub fn new(title: &str, is_authenticated: bool, content: impl Render + 'static) -> Self {
        Self {
            title: title.to_string(),
            is_authenticated,
            head: None,
            content: Box::new(content),
        }
    }

    pub fn with_head(mut self, head: Markup) -> Self {
        self.head = Some(head);
        self
    }
}

impl Render for Page {
    fn render(&self) -> Markup {
        html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    meta name="viewport" content="width=device-width, initial-scale=1.0";
                    title { (self.title) }
                    script src="https://unpkg.com/@tailwindcss/browser@4" {}
                    @if let Some(head) = &self.head {
                        (head)
                    }
                }
                body class="min-h-screen bg-gradient-to-br from-blue-100 via-indigo-50 to-purple-100" {
                    nav class="bg-white shadow-sm px-6 py-3 flex items-center justify-between" {
                        a href="/" class="font-semibold text-indigo-700" { "Embedded Sign-In Widget" }
                        div class="flex items-center gap-4" {
                            @if self.is_authenticated {
                                a href="/profile" class="text-indigo-600 hover:text-indigo-800" { "My Profile" }
                                form method="post" action="/logout" {
                                    button type="submit" class="text-gray-600 hover:text-gray-900" { "Logout" }
                                }
                            } @else {
                                a href="/login" class="text-indigo-600 hover:text-indigo-800" { "Login" }
                            }
                        }
                    }
                    main class="max-w-2xl mx-auto py-8 px-4" {
                        (self.content.render())
                    }
                }
            }
        }
    }
}

impl axum::response::IntoResponse for Page {
    fn into_response(self) -> axum::response::Response {
        self.render().into_response()
    }
}

pub struct Card {
    pub content: Box<dyn Render>,
}

impl Card {
    pub fn new(content: impl Render + 'static) -> Self {
        Self {
            content: Box::new(content),
        }
    }
}

impl Render for Card {
    fn render(&self) -> Markup {
        html! {
            div class="bg-white rounded-xl border border-gray-100 shadow-md overflow-hidden p-8" {
                (self.content.render())
            }
        }
    }
}
