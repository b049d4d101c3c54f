//! 纤维图谱构建前的弥散加权图像准备。
//!
//! 对每个受试者`n`：预处理DWI并得到张量，估计多室模型，
//! 把FA配准到TractSeg的MNI模板上运行TractSeg，再把各纤维束的起止区域变换回原空间。
//! 输出目录结构：
//!
//! - `Tensors/DTI_{n}.nrrd`
//! - `Preprocessed_DWI/DWI_{n}_preprocessed{.nrrd,.bvec,.bval,_brainMask.nrrd}`
//! - `MCM/DWI_{n}_preprocessed_MCM_avg{,.mcm}`
//! - `Tracts_Masks/{tract}_{n}.nrrd`

use crate::error::{AtlasError, Result};
use crate::exec::{run_checked, Command, Executor};
use crate::layout::Layout;
use crate::params::value::code_enum;
use crate::store::ArtifactStore;
use crate::toolkit::Toolkit;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const PREPROCESSING_SCRIPT: &str = "diffusion/animaDiffusionImagePreprocessing.py";
pub const MCM_ESTIMATION_SCRIPT: &str = "diffusion/animaMultiCompartmentModelEstimation.py";
pub const TRACTSEG: &str = "TractSeg";

pub const TENSORS_DIR: &str = "Tensors";
pub const PREPROCESSED_DIR: &str = "Preprocessed_DWI";
pub const MCM_DIR: &str = "MCM";
pub const TRACTS_DIR: &str = "Tracts_Masks";

/// TractSeg输出的纤维束。
pub const TRACTS: [&str; 72] = [
    "AF_left", "AF_right", "ATR_left", "ATR_right", "CA", "CC_1", "CC_2", "CC_3", "CC_4", "CC_5",
    "CC_6", "CC_7", "CG_left", "CG_right", "CST_left", "CST_right", "MLF_left", "MLF_right",
    "FPT_left", "FPT_right", "FX_left", "FX_right", "ICP_left", "ICP_right", "IFO_left",
    "IFO_right", "ILF_left", "ILF_right", "MCP", "OR_left", "OR_right", "POPT_left", "POPT_right",
    "SCP_left", "SCP_right", "SLF_I_left", "SLF_I_right", "SLF_II_left", "SLF_II_right",
    "SLF_III_left", "SLF_III_right", "STR_left", "STR_right", "UF_left", "UF_right", "CC",
    "T_PREF_left", "T_PREF_right", "T_PREM_left", "T_PREM_right", "T_PREC_left", "T_PREC_right",
    "T_POSTC_left", "T_POSTC_right", "T_PAR_left", "T_PAR_right", "T_OCC_left", "T_OCC_right",
    "ST_FO_left", "ST_FO_right", "ST_PREF_left", "ST_PREF_right", "ST_PREM_left", "ST_PREM_right",
    "ST_PREC_left", "ST_PREC_right", "ST_POSTC_left", "ST_POSTC_right", "ST_PAR_left",
    "ST_PAR_right", "ST_OCC_left", "ST_OCC_right",
];

/// `2*e + b`的阈值。
const ENDINGS_THRESHOLD: f64 = 2.1;

code_enum! {
    /// 纤维室模型。
    CompartmentType: "compartment type" {
        Stick = "STICK",
        Zeppelin = "ZEPPELIN",
        Tensor = "TENSOR",
        Noddi = "NODDI",
        Ddi = "DDI",
    }
}

impl CompartmentType {
    /// 估计脚本接受的小写名称。
    #[inline]
    pub fn script_name(self) -> String {
        self.name().to_lowercase()
    }
}

impl Default for CompartmentType {
    fn default() -> Self {
        CompartmentType::Tensor
    }
}

/// 受试者数据的位置。各前缀均为“目录 + 文件名前缀”，文件为`{prefix}_{n}.*`。
#[derive(Clone, Debug, PartialEq)]
pub struct DwiInputs {
    pub num_subjects: usize,
    pub dwi_prefix: PathBuf,
    pub t1_prefix: PathBuf,
    /// 给定时由DICOM目录`{prefix}_{n}/`读取梯度方向，否则使用`.bvec`文件。
    pub dicom_prefix: Option<PathBuf>,
    pub compartment: CompartmentType,
    /// TractSeg包中的MNI空间FA模板。
    pub fa_template: PathBuf,
    pub reversed_b0: bool,
}

/// 受试者`n`相关的全部路径。
struct SubjectPaths {
    n: usize,
    dwi: PathBuf,
    bval: PathBuf,
    bvec: PathBuf,
    reversed_b0: PathBuf,
    t1: PathBuf,
    dicom: Option<PathBuf>,
    dwi_base: PathBuf,
    dwi_prefix: String,
    pre_dir: PathBuf,
    mcm_dir: PathBuf,
    tensors: PathBuf,
    scratch: PathBuf,
}

impl SubjectPaths {
    fn new(inputs: &DwiInputs, output: &Path, scratch_root: &Path, n: usize) -> Result<Self> {
        let dwi = Layout::from_data_prefix(&inputs.dwi_prefix)?;
        let t1 = Layout::from_data_prefix(&inputs.t1_prefix)?;
        let dicom = inputs
            .dicom_prefix
            .as_deref()
            .map(Layout::from_data_prefix)
            .transpose()?;
        let stem = format!("{}_{n}", dwi.prefix());
        Ok(Self {
            n,
            dwi: dwi.base().join(format!("{stem}.nii.gz")),
            bval: dwi.base().join(format!("{stem}.bval")),
            bvec: dwi.base().join(format!("{stem}.bvec")),
            reversed_b0: dwi.base().join(format!("{stem}_reversed_b0.nii.gz")),
            t1: t1.base().join(format!("{}_{n}.nii.gz", t1.prefix())),
            dicom: dicom.map(|d| d.base().join(format!("{}_{n}", d.prefix())).join("*")),
            dwi_base: dwi.base().to_path_buf(),
            dwi_prefix: stem,
            pre_dir: output.join(PREPROCESSED_DIR),
            mcm_dir: output.join(MCM_DIR),
            tensors: output.join(TENSORS_DIR).join(format!("DTI_{n}.nrrd")),
            scratch: scratch_root.join(format!("subject_{n}")),
        })
    }

    /// 预处理脚本写在DWI旁边的文件。
    #[inline]
    fn beside_dwi(&self, suffix: &str) -> PathBuf {
        self.dwi_base.join(format!("{}{suffix}", self.dwi_prefix))
    }

    #[inline]
    fn preprocessed(&self, suffix: &str) -> PathBuf {
        self.pre_dir.join(self.preprocessed_name(suffix))
    }

    #[inline]
    fn preprocessed_name(&self, suffix: &str) -> String {
        format!("DWI_{}_preprocessed{suffix}", self.n)
    }

    #[inline]
    fn scratch(&self, name: &str) -> PathBuf {
        self.scratch.join(name)
    }

    #[inline]
    fn endings(&self, name: &str) -> PathBuf {
        self.scratch.join("endings_segmentations").join(name)
    }
}

pub struct DwiPreparation {
    store: Arc<dyn ArtifactStore>,
    executor: Arc<dyn Executor>,
    toolkit: Toolkit,
    output_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl DwiPreparation {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        executor: Arc<dyn Executor>,
        toolkit: Toolkit,
        output_dir: PathBuf,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            executor,
            toolkit,
            output_dir,
            scratch_dir,
        }
    }

    pub fn run(&self, inputs: &DwiInputs) -> Result<()> {
        for dir in [TENSORS_DIR, PREPROCESSED_DIR, MCM_DIR, TRACTS_DIR] {
            self.store.create_dir_all(&self.output_dir.join(dir))?;
        }
        for n in 1..=inputs.num_subjects {
            info!(subject = n, "preparing subject");
            self.prepare_subject(inputs, n)
                .map_err(|e| AtlasError::Subject {
                    subject: n,
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    #[inline]
    fn exec(&self, cmd: &Command) -> Result<()> {
        run_checked(self.executor.as_ref(), self.store.as_ref(), cmd).map(drop)
    }

    pub fn prepare_subject(&self, inputs: &DwiInputs, n: usize) -> Result<()> {
        let p = SubjectPaths::new(inputs, &self.output_dir, &self.scratch_dir, n)?;
        self.preprocess(inputs, &p)?;
        self.estimate_mcm(inputs, &p)?;
        self.store.create_dir_all(&p.scratch)?;
        let series = self.register_to_template(inputs, &p)?;
        self.segment_tracts(&p, &series)?;
        self.store.remove(&p.scratch)?;
        Ok(())
    }

    fn preprocess(&self, inputs: &DwiInputs, p: &SubjectPaths) -> Result<()> {
        let mut cmd = self
            .toolkit
            .script(PREPROCESSING_SCRIPT)?
            .input("-b", &p.bval)
            .input("-t", &p.t1)
            .input("-i", &p.dwi);
        if inputs.reversed_b0 {
            cmd = cmd.input("-r", &p.reversed_b0);
        }
        cmd = match p.dicom.as_deref() {
            Some(dicom) => cmd.input("-D", dicom),
            None => cmd.input("-g", &p.bvec),
        };
        for suffix in [
            "_Tensors.nrrd",
            "_Tensors_B0.nrrd",
            "_Tensors_NoiseVariance.nrrd",
            "_preprocessed.bvec",
            "_preprocessed.nrrd",
            "_brainMask.nrrd",
        ] {
            cmd = cmd.produces(&p.beside_dwi(suffix));
        }
        self.exec(&cmd)?;

        let s = self.store.as_ref();
        s.rename(&p.beside_dwi("_Tensors.nrrd"), &p.tensors)?;
        s.rename(&p.beside_dwi("_preprocessed.bvec"), &p.preprocessed(".bvec"))?;
        s.copy(&p.bval, &p.preprocessed(".bval"))?;
        s.rename(&p.beside_dwi("_preprocessed.nrrd"), &p.preprocessed(".nrrd"))?;
        s.rename(&p.beside_dwi("_brainMask.nrrd"), &p.preprocessed("_brainMask.nrrd"))?;
        s.remove(&p.beside_dwi("_Tensors_B0.nrrd"))?;
        s.remove(&p.beside_dwi("_Tensors_NoiseVariance.nrrd"))?;
        Ok(())
    }

    fn estimate_mcm(&self, inputs: &DwiInputs, p: &SubjectPaths) -> Result<()> {
        let cmd = self
            .toolkit
            .script(MCM_ESTIMATION_SCRIPT)?
            .flag("-i", p.preprocessed_name(".nrrd"))
            .flag("-g", p.preprocessed_name(".bvec"))
            .flag("-b", p.preprocessed_name(".bval"))
            .flag("-n", 3)
            .flag("-m", p.preprocessed_name("_brainMask.nrrd"))
            .flag("-t", inputs.compartment.script_name())
            .current_dir(&p.pre_dir)
            .produces(&p.preprocessed("_MCM_avg.mcm"))
            .produces(&p.preprocessed("_MCM_avg"));
        self.exec(&cmd)?;

        let s = self.store.as_ref();
        for suffix in ["_MCM_avg.mcm", "_MCM_avg"] {
            s.rename(
                &p.preprocessed(suffix),
                &p.mcm_dir.join(p.preprocessed_name(suffix)),
            )?;
        }
        let leftover = p.preprocessed_name("_MCM");
        for entry in s.list_dir(&p.pre_dir)? {
            let matches = entry
                .file_name()
                .and_then(|f| f.to_str())
                .is_some_and(|f| f.starts_with(leftover.as_str()));
            if matches {
                debug!(path = %entry.display(), "removing estimation leftover");
                s.remove(&entry)?;
            }
        }
        Ok(())
    }

    /// 将受试者配准到MNI模板，返回变换序列文件。
    fn register_to_template(&self, inputs: &DwiInputs, p: &SubjectPaths) -> Result<PathBuf> {
        let tk = &self.toolkit;
        let fa = p.scratch("Subject_FA.nrrd");
        let transform = p.scratch("Subject_FA_OnMNI_tr.txt");
        let series = p.scratch("Subject_FA_OnMNI_tr.xml");
        let dwi_mni = p.scratch("DWI_MNI.nii.gz");
        let bvec_mni = p.scratch("DWI_MNI.bvec");

        self.exec(&tk.compute_fa(&p.tensors, &fa))?;
        self.exec(
            &tk.pyramidal_bm_registration(
                &inputs.fa_template,
                &fa,
                &p.scratch("Subject_FA_OnMNI.nrrd"),
                &transform,
            )
            .flag("-s", 0),
        )?;
        self.exec(&tk.transform_serie_xml(&[transform.as_path()], &series))?;
        self.exec(
            &tk.apply_transform_serie(&p.preprocessed(".nrrd"), &series, &inputs.fa_template, &dwi_mni)
                .input("--grad", &p.preprocessed(".bvec"))
                .output("-O", &bvec_mni),
        )?;
        self.store
            .copy(&p.preprocessed(".bval"), &p.scratch("DWI_MNI.bval"))?;
        let flipped = flip_bvec_y(&self.store.read_to_string(&bvec_mni)?)?;
        self.store.write(&bvec_mni, &flipped)?;
        self.exec(
            &tk.apply_transform_serie(
                &p.preprocessed("_brainMask.nrrd"),
                &series,
                &inputs.fa_template,
                &p.scratch("DWI_MNI_brainMask.nii.gz"),
            )
            .flag("-n", "nearest"),
        )?;
        Ok(series)
    }

    fn segment_tracts(&self, p: &SubjectPaths, series: &Path) -> Result<()> {
        let tk = &self.toolkit;
        let mut tractseg = Command::new(TRACTSEG)
            .input("-i", &p.scratch("DWI_MNI.nii.gz"))
            .input("-o", &p.scratch)
            .input("--bvals", &p.scratch("DWI_MNI.bval"))
            .input("--bvecs", &p.scratch("DWI_MNI.bvec"))
            .arg("--raw_diffusion_input")
            .input("--brain_mask", &p.scratch("DWI_MNI_brainMask.nii.gz"))
            .flag("--output_type", "endings_segmentation");
        for tract in TRACTS {
            tractseg = tractseg
                .produces(&p.endings(&format!("{tract}_e.nii.gz")))
                .produces(&p.endings(&format!("{tract}_b.nii.gz")));
        }
        self.exec(&tractseg)?;

        let tmp = p.scratch("tmp.nrrd");
        let native = p.preprocessed(".nrrd");
        for tract in TRACTS {
            let merged = p.endings(&format!("{tract}.nrrd"));
            self.exec(&tk.image_scale_add(
                &p.endings(&format!("{tract}_e.nii.gz")),
                2.0,
                &p.endings(&format!("{tract}_b.nii.gz")),
                &merged,
            ))?;
            self.exec(&tk.threshold_image(&merged, ENDINGS_THRESHOLD, &tmp))?;
            self.exec(&tk.image_subtract(&merged, &tmp, &merged))?;
            let target = self
                .output_dir
                .join(TRACTS_DIR)
                .join(format!("{tract}_{}.nrrd", p.n));
            self.exec(
                &tk.apply_transform_serie(&merged, series, &native, &target)
                    .arg("-I")
                    .flag("-n", "nearest"),
            )?;
        }
        debug!(subject = p.n, tracts = TRACTS.len(), "tract endings resampled to native space");
        Ok(())
    }
}

/// 翻转梯度方向文件中的y分量（第二行），输出格式与numpy的`savetxt`一致。
pub fn flip_bvec_y(text: &str) -> Result<String> {
    let rows: Vec<Vec<f64>> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            l.split_whitespace()
                .map(|v| {
                    v.parse::<f64>()
                        .map_err(|e| AtlasError::Invalid(format!("invalid bvec value `{v}`: {e}")))
                })
                .collect()
        })
        .collect::<Result<_>>()?;
    let cols = rows.first().map_or(0, Vec::len);
    if rows.len() < 2 || rows.iter().any(|r| r.len() != cols) {
        return Err(AtlasError::Invalid(
            "bvec file must contain at least two rows of equal length".to_string(),
        ));
    }
    let mut table = Array2::from_shape_vec((rows.len(), cols), rows.concat())
        .map_err(|e| AtlasError::Invalid(format!("malformed bvec table: {e}")))?;
    table.row_mut(1).mapv_inplace(|v| -v);

    let mut out = String::new();
    for row in table.rows() {
        let line: Vec<String> = row.iter().map(|&v| format_sci(v)).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    Ok(out)
}

/// `%.18e`格式。
fn format_sci(v: f64) -> String {
    let s = format!("{v:.18e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compartment_names_are_passed_lowercase() {
        assert_eq!("ddi".parse::<CompartmentType>().unwrap(), CompartmentType::Ddi);
        assert_eq!(CompartmentType::Noddi.script_name(), "noddi");
        assert_eq!(CompartmentType::default().script_name(), "tensor");
        assert!("ball".parse::<CompartmentType>().is_err());
    }

    #[test]
    fn bvec_y_row_is_negated() {
        let text = "1 0 0.5\n0 1 -0.5\n0 0 0.7071\n";
        let flipped = flip_bvec_y(text).unwrap();
        let rows: Vec<Vec<f64>> = flipped
            .lines()
            .map(|l| l.split_whitespace().map(|v| v.parse().unwrap()).collect())
            .collect();
        assert_eq!(rows[0], [1.0, 0.0, 0.5]);
        assert_eq!(rows[1], [-0.0, -1.0, 0.5]);
        assert_eq!(rows[2], [0.0, 0.0, 0.7071]);
        assert!(flipped.starts_with("1.000000000000000000e+00 "));
    }

    #[test]
    fn malformed_bvec_files_are_rejected() {
        assert!(flip_bvec_y("").is_err());
        assert!(flip_bvec_y("1 2 3\n").is_err());
        assert!(flip_bvec_y("1 2 3\n4 5\n").is_err());
        assert!(flip_bvec_y("1 x 3\n4 5 6\n").is_err());
    }

    #[test]
    fn exponents_have_two_digits_and_a_sign() {
        assert_eq!(format_sci(0.0), "0.000000000000000000e+00");
        assert_eq!(format_sci(-0.25), "-2.500000000000000000e-01");
        assert_eq!(format_sci(1e100), "1.000000000000000000e+100");
    }

    #[test]
    fn there_are_seventy_two_distinct_tracts() {
        let set: std::collections::BTreeSet<_> = TRACTS.iter().collect();
        assert_eq!(set.len(), TRACTS.len());
    }
}
