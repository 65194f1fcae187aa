//! División de un PDF en artefactos por página (`pages/00001.txt`, ...).
//!
//! El estado del troceado se guarda en ficheros de control junto a `pages/`:
//! - `control.success`: ya troceado, se reutilizan las páginas.
//! - `control.in-progress`: otra ejecución lo está procesando, se omite.
//! - `control.error`: el intento anterior falló, se borra `pages/` y se repite.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error, info};

const CONTROL_SUCCESS: &str = "control.success";
const CONTROL_IN_PROGRESS: &str = "control.in-progress";
const CONTROL_ERROR: &str = "control.error";
const PAGE_EXTENSION: &str = "txt";

/// Nombre de carpeta para la salida de un fichero: sin extensión y sin
/// caracteres ilegales en rutas.
pub fn sanitize_folder_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    stem.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect()
}

/// Trocea `pdf_path` en `output_dir/pages`. Devuelve las páginas en orden de
/// lectura, o `None` si otra ejecución tiene el PDF en curso. Es bloqueante.
pub fn split_pdf_pages(pdf_path: &Path, output_dir: &Path) -> Result<Option<Vec<PathBuf>>> {
    let pages_dir = output_dir.join("pages");
    let control_success = output_dir.join(CONTROL_SUCCESS);
    let control_in_progress = output_dir.join(CONTROL_IN_PROGRESS);
    let control_error = output_dir.join(CONTROL_ERROR);
    let name = pdf_path.display();

    if control_success.exists() {
        info!("PDF '{name}' ya troceado. Reutilizando sus páginas.");
        return list_pages(&pages_dir).map(Some);
    }

    if control_in_progress.exists() {
        info!("PDF '{name}' en proceso por otra ejecución. Omitido.");
        return Ok(None);
    }

    if control_error.exists() {
        info!("Encontrado control de error para '{name}'. Limpiando y empezando de nuevo.");
        if pages_dir.exists() {
            fs::remove_dir_all(&pages_dir)?;
        }
        fs::remove_file(&control_error)?;
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("No se pudo crear {}", output_dir.display()))?;
    fs::File::create(&control_in_progress)?;
    info!("Troceando '{name}'...");

    match write_pages(pdf_path, &pages_dir) {
        Ok(pages) => {
            fs::rename(&control_in_progress, &control_success)?;
            info!("PDF '{name}' troceado en {} páginas en '{}'", pages.len(), pages_dir.display());
            Ok(Some(pages))
        }
        Err(err) => {
            error!("Error troceando el PDF '{name}': {err:#}");
            if control_in_progress.exists() {
                fs::rename(&control_in_progress, &control_error)?;
            }
            Err(err)
        }
    }
}

fn write_pages(pdf_path: &Path, pages_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(pages_dir)?;
    let texts = pdf_extract::extract_text_by_pages(pdf_path)
        .map_err(|e| anyhow!("No se pudo extraer texto del PDF {}: {}", pdf_path.display(), e))?;

    let mut pages = Vec::with_capacity(texts.len());
    for (idx, text) in texts.iter().enumerate() {
        let output_path = pages_dir.join(format!("{:05}.{PAGE_EXTENSION}", idx + 1));
        fs::write(&output_path, text)?;
        debug!("Guardada la página {} en {}", idx + 1, output_path.display());
        pages.push(output_path);
    }
    Ok(pages)
}

fn list_pages(pages_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages: Vec<PathBuf> = fs::read_dir(pages_dir)
        .with_context(|| format!("No se pudo leer {}", pages_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(PAGE_EXTENSION))
        .collect();
    pages.sort();
    Ok(pages)
}
