//! Word document generation.
//!
//! Writes the single-file Word 2003 XML format (WordprocessingML), which
//! Word and most office suites open directly. Images are embedded inline as
//! base64 `w:binData` blocks referenced by VML shapes, so the result is one
//! self-contained file without a zip container.

use anyhow::Result;
use base64::Engine;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// A fully resolved element ready to be rendered into a document
#[derive(Debug, Clone)]
pub enum DocElement {
    Paragraph(String),
    /// Decoded image bytes, already watermark-cropped
    Image(Vec<u8>),
    /// Stand-in paragraph for an image that failed to download
    ImagePlaceholder,
}

/// Target picture width in points (5.5 inches)
const IMAGE_WIDTH_PT: f64 = 396.0;

pub struct WordWriter;

impl WordWriter {
    /// Render elements into a Word XML document at `path`.
    /// Parent directories are created as needed.
    pub async fn write(path: &Path, title: &str, elements: &[DocElement]) -> Result<()> {
        debug!("Generating document: {}", path.display());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(path).await?;

        file.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n")
            .await?;
        file.write_all(b"<?mso-application progid=\"Word.Document\"?>\n")
            .await?;
        file.write_all(
            b"<w:wordDocument xmlns:w=\"http://schemas.microsoft.com/office/word/2003/wordml\"\n \
              xmlns:v=\"urn:schemas-microsoft-com:vml\"\n \
              xmlns:w10=\"urn:schemas-microsoft-com:office:word\">\n",
        )
        .await?;
        file.write_all(
            "  <w:fonts><w:defaultFonts w:ascii=\"宋体\" w:fareast=\"宋体\" w:h-ansi=\"宋体\"/></w:fonts>\n"
                .as_bytes(),
        )
        .await?;
        file.write_all(
            b"  <w:styles><w:style w:type=\"paragraph\" w:default=\"on\" w:styleId=\"Normal\">\
              <w:name w:val=\"Normal\"/><w:rPr><w:sz w:val=\"24\"/></w:rPr></w:style></w:styles>\n",
        )
        .await?;
        file.write_all(b"  <w:body>\n").await?;

        let mut image_index = 0usize;
        for element in elements {
            match element {
                DocElement::Paragraph(text) => {
                    Self::write_paragraph(&mut file, text).await?;
                }
                DocElement::Image(bytes) => {
                    image_index += 1;
                    Self::write_image(&mut file, bytes, image_index).await?;
                }
                DocElement::ImagePlaceholder => {
                    Self::write_paragraph(&mut file, "[图片加载失败]").await?;
                }
            }
        }

        file.write_all(b"  </w:body>\n</w:wordDocument>\n").await?;
        file.flush().await?;

        info!("Document saved: {} ({})", path.display(), title);
        Ok(())
    }

    async fn write_paragraph(file: &mut File, text: &str) -> Result<()> {
        let escaped = html_escape::encode_text(text);
        file.write_all(
            format!("    <w:p><w:r><w:t>{}</w:t></w:r></w:p>\n", escaped).as_bytes(),
        )
        .await?;
        Ok(())
    }

    async fn write_image(file: &mut File, bytes: &[u8], index: usize) -> Result<()> {
        // Word needs explicit shape dimensions; scale to the fixed width
        let height_pt = match image::load_from_memory(bytes) {
            Ok(img) if img.width() > 0 => {
                IMAGE_WIDTH_PT * img.height() as f64 / img.width() as f64
            }
            _ => IMAGE_WIDTH_PT * 3.0 / 4.0,
        };

        let name = format!("wordml://img{}.png", index);
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

        file.write_all(
            format!(
                "    <w:p><w:r><w:pict>\
                 <w:binData w:name=\"{name}\">{encoded}</w:binData>\
                 <v:shape style=\"width:{width:.1}pt;height:{height:.1}pt\">\
                 <v:imagedata src=\"{name}\"/></v:shape>\
                 </w:pict></w:r></w:p>\n",
                name = name,
                encoded = encoded,
                width = IMAGE_WIDTH_PT,
                height = height_pt,
            )
            .as_bytes(),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn png_1x1() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(2, 1);
        let mut out = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageOutputFormat::Png,
        )
        .unwrap();
        out
    }

    #[tokio::test]
    async fn test_write_document_with_text_and_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.doc");

        let elements = vec![
            DocElement::Paragraph("第一段 <tag> & more".to_string()),
            DocElement::Image(png_1x1()),
            DocElement::ImagePlaceholder,
        ];
        WordWriter::write(&path, "标题", &elements).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("<?xml"));
        assert!(content.contains("Word.Document"));
        // Markup in paragraph text is escaped
        assert!(content.contains("&lt;tag&gt; &amp; more"));
        assert!(content.contains("w:binData"));
        assert!(content.contains("wordml://img1.png"));
        assert!(content.contains("[图片加载失败]"));
        assert!(content.ends_with("</w:wordDocument>\n"));
    }

    #[tokio::test]
    async fn test_image_height_scales_with_aspect_ratio() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.doc");

        // 2x1 image: height should be half the fixed width
        WordWriter::write(&path, "t", &[DocElement::Image(png_1x1())])
            .await
            .unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("width:396.0pt;height:198.0pt"));
    }
}
