//! Measuring live elements.
//!
//! Bounds include margins. The root element is measured by its client area
//! and sits at the origin.

use crate::{
    error::Result,
    host::{ElementId, HostBridge, NativeCall},
    session::Session,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Insets {
    pub top: i64,
    pub left: i64,
    pub bottom: i64,
    pub right: i64,
}

impl Insets {
    pub fn width(&self) -> i64 {
        self.left + self.right
    }

    pub fn height(&self) -> i64 {
        self.top + self.bottom
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Whole pixels of a computed style value such as `"12.5px"`. Anything
/// without a `px` unit reads as 0.
pub fn value_px(value: Option<&str>) -> i64 {
    value
        .and_then(|v| v.strip_suffix("px"))
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map_or(0, |v| v.trunc() as i64)
}

const SIDES: [&str; 4] = ["top", "left", "bottom", "right"];

fn computed_style(
    host: &mut dyn HostBridge,
    element: ElementId,
    property: &str,
) -> Result<Option<String>> {
    let call = NativeCall::ComputedStyle {
        element,
        property: property.to_string(),
    };
    Ok(host.invoke(call.clone())?.into_text(&call)?)
}

fn int_attribute(host: &mut dyn HostBridge, element: ElementId, name: &str) -> Result<i64> {
    let call = NativeCall::IntAttribute {
        element,
        name: name.to_string(),
    };
    Ok(host.invoke(call.clone())?.into_int(&call)?)
}

fn insets(
    host: &mut dyn HostBridge,
    mut side: impl FnMut(&mut dyn HostBridge, &str) -> Result<i64>,
) -> Result<Insets> {
    let mut values = [0; 4];
    for (value, name) in values.iter_mut().zip(SIDES) {
        *value = side(&mut *host, name)?;
    }
    let [top, left, bottom, right] = values;
    Ok(Insets {
        top,
        left,
        bottom,
        right,
    })
}

impl Session {
    pub fn computed_style(&mut self, element: ElementId, property: &str) -> Result<Option<String>> {
        computed_style(self.host_mut()?, element, property)
    }

    pub fn computed_style_px(&mut self, element: ElementId, property: &str) -> Result<i64> {
        Ok(value_px(self.computed_style(element, property)?.as_deref()))
    }

    /// Border widths; a side whose style is `none` has no border.
    pub fn borders(&mut self, element: ElementId) -> Result<Insets> {
        insets(self.host_mut()?, |host, side| {
            let style = computed_style(host, element, &format!("border-{side}-style"))?;
            if style.as_deref().map_or(true, |s| s == "none") {
                return Ok(0);
            }
            let width = computed_style(host, element, &format!("border-{side}-width"))?;
            Ok(value_px(width.as_deref()))
        })
    }

    pub fn margins(&mut self, element: ElementId) -> Result<Insets> {
        insets(self.host_mut()?, |host, side| {
            let value = computed_style(host, element, &format!("margin-{side}"))?;
            Ok(value_px(value.as_deref()))
        })
    }

    pub fn paddings(&mut self, element: ElementId) -> Result<Insets> {
        insets(self.host_mut()?, |host, side| {
            let value = computed_style(host, element, &format!("padding-{side}"))?;
            Ok(value_px(value.as_deref()))
        })
    }

    pub fn is_root(&self, element: ElementId) -> bool {
        self.root == Some(element)
    }

    fn element_size(&mut self, element: ElementId) -> Result<(i64, i64)> {
        let (width, height) = if self.is_root(element) {
            ("clientWidth", "clientHeight")
        } else {
            ("offsetWidth", "offsetHeight")
        };
        let host = self.host_mut()?;
        Ok((
            int_attribute(host, element, width)?,
            int_attribute(host, element, height)?,
        ))
    }

    /// Bounds relative to the offset parent.
    pub fn model_bounds(&mut self, element: ElementId) -> Result<Rect> {
        let (width, height) = self.element_size(element)?;
        if self.is_root(element) {
            return Ok(Rect {
                x: 0,
                y: 0,
                width,
                height,
            });
        }
        let margins = self.margins(element)?;
        let host = self.host_mut()?;
        let left = int_attribute(host, element, "offsetLeft")?;
        let top = int_attribute(host, element, "offsetTop")?;
        Ok(Rect {
            x: left - margins.left,
            y: top - margins.top,
            width: width + margins.width(),
            height: height + margins.height(),
        })
    }

    /// Bounds relative to the page.
    pub fn absolute_bounds(&mut self, element: ElementId) -> Result<Rect> {
        let (mut width, mut height) = self.element_size(element)?;
        let margins = self.margins(element)?;
        if self.is_root(element) {
            if self.is_strict_mode() {
                let borders = self.borders(element)?;
                width += margins.width() + borders.width();
                height += margins.height() + borders.height();
            }
            return Ok(Rect {
                x: 0,
                y: 0,
                width,
                height,
            });
        }

        let call = NativeCall::AbsolutePosition { element };
        let (x, y) = self.host_mut()?.invoke(call.clone())?.into_point(&call)?;
        Ok(Rect {
            x: x - margins.left,
            y: y - margins.top,
            width: width + margins.width(),
            height: height + margins.height(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pixel_values() {
        assert_eq!(value_px(Some("12px")), 12);
        assert_eq!(value_px(Some("12.7px")), 12);
        assert_eq!(value_px(Some("-3px")), -3);
        assert_eq!(value_px(Some("0px")), 0);
    }

    #[test]
    fn non_pixel_values_read_as_zero() {
        assert_eq!(value_px(None), 0);
        assert_eq!(value_px(Some("auto")), 0);
        assert_eq!(value_px(Some("2em")), 0);
        assert_eq!(value_px(Some("px")), 0);
    }

    #[test]
    fn insets_sum_sides() {
        let insets = Insets {
            top: 1,
            left: 2,
            bottom: 3,
            right: 4,
        };
        assert_eq!(insets.width(), 6);
        assert_eq!(insets.height(), 4);
    }
}
