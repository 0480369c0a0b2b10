use iced::{Border, Color, Shadow, Theme};
use iced::widget::button::{StyleSheet, Appearance};

// a button that looks like a hyperlink
pub struct LinkButtonStyleSheet;

const LINK_COLOR: Color = Color { r: 0.10, g: 0.35, b: 0.80, a: 1.0 };

impl StyleSheet for LinkButtonStyleSheet {
    type Style = Theme;

    fn active(&self, _style: &Self::Style) -> Appearance {
        Appearance {
            shadow_offset: Default::default(),
            background: None,
            text_color: LINK_COLOR,
            border: Border {
                color: Color::TRANSPARENT,
                width: 0.0,
                radius: 0.0.into(),
            },
            shadow: Shadow::default(),
        }
    }

    fn hovered(&self, style: &Self::Style) -> Appearance {
        Appearance {
            text_color: Color { a: 0.75, ..LINK_COLOR },
            ..self.active(style)
        }
    }
}
