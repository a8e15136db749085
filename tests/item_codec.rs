//! Item classification from wire headers

use image::{DynamicImage, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use rstest::rstest;

use remotestash::item::{Content, Item};

fn sample_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 2, Rgb([200, 40, 10])))
}

#[rstest]
#[case("text/plain; charset=utf-8", b"plain".to_vec(), "text")]
#[case("text/html", b"<b>bold</b>".to_vec(), "text")]
#[case("application/json", b"{}".to_vec(), "binary")]
#[case("image/png", b"not a png".to_vec(), "binary")]
#[case("text/plain; charset=utf-8", vec![0xff, 0xfe, 0xfd], "binary")]
fn test_classification_by_header(
    #[case] content_type: &str,
    #[case] body: Vec<u8>,
    #[case] kind: &str,
) {
    let item = Item::from_http_parts(body, Some(content_type), None);
    assert_eq!(item.content().kind(), kind);
}

#[rstest]
#[case("image/png")]
#[case("image/jpeg")]
fn test_image_survives_the_wire(#[case] content_type: &str) {
    let sent = Item::image(sample_image(), content_type, None);
    let received = Item::from_http_parts(
        sent.http_body(),
        Some(&sent.http_content_type_header()),
        None,
    );

    match received.content() {
        Content::Image(image) => {
            assert_eq!(image.width(), 3);
            assert_eq!(image.height(), 2);
        }
        other => panic!("expected image, got {:?}", other),
    }
    assert_eq!(received.content_type(), content_type);
}

#[test]
fn test_latin1_text_is_decoded() {
    // "café" in ISO-8859-1
    let body = vec![0x63, 0x61, 0x66, 0xe9];
    let item = Item::from_http_parts(body.clone(), Some("text/plain; charset=iso-8859-1"), None);

    assert_eq!(item.as_text(), Some("café"));
    assert_eq!(item.size(), 4);
    assert_eq!(item.http_body(), body);
}

#[test]
fn test_missing_content_type_is_binary() {
    let item = Item::from_http_parts(vec![1, 2, 3], None, Some("attachment; filename=\"a.bin\""));

    assert_eq!(item.content_type(), "application/octet-stream");
    assert_eq!(item.filename(), Some("a.bin"));
    assert_eq!(item.content().kind(), "binary");
}
