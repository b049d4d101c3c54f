//! 刚性与稠密配准的参数记录。
//!
//! 每条记录的字段声明顺序即外部程序命令行参数的顺序，不能随意调整。

use super::enums::*;
use super::value::ParamValue;
use crate::error::ParamError;

macro_rules! registration_record {
    (
        $(#[$meta:meta])*
        $name:ident, $patch:ident {
            $($(#[$fmeta:meta])* $field:ident : $ty:ty = $default:expr => $flag:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty),+
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $($field: $default),+
                }
            }
        }

        impl $name {
            /// 按命令行顺序排列的参数标志。
            pub const FLAGS: &'static [&'static str] = &[$($flag),+];

            /// 渲染为外部程序的参数列表：`[flag, value, flag, value, ...]`。
            pub fn command_args(&self) -> Vec<String> {
                let mut args = Vec::with_capacity(2 * Self::FLAGS.len());
                $(
                    args.push($flag.to_string());
                    args.push(ParamValue::to_arg(&self.$field));
                )+
                args
            }

            /// 用参数文件中出现的字段覆盖当前值。
            pub(crate) fn apply(&mut self, patch: $patch) -> Result<(), ParamError> {
                $(
                    if let Some(raw) = patch.$field {
                        self.$field = <$ty as ParamValue>::resolve(raw)?;
                    }
                )+
                Ok(())
            }
        }

        /// 参数文件中的一个节；未出现的字段为`None`。
        #[derive(Debug, Default, serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        pub(crate) struct $patch {
            $($field: Option<<$ty as ParamValue>::Raw>),+
        }
    };
}

registration_record! {
    /// `animaDenseSVFBMRegistration`的参数。
    ///
    /// 取值含义与该程序帮助文档一致。
    DenseParameters, DensePatch {
        last_pyramid_level: u32 = 0 => "-l",
        number_of_pyramid_levels: u32 = 3 => "-p",
        exponentiation_order: f64 = 0.0 => "-e",
        bch_order: u32 = 1 => "-b",
        m_estimation_threshold: f64 = 0.01 => "--met",
        outlier_rejection_sigma: f64 = 3.0 => "--os",
        elastic_regularisation_sigma: f64 = 3.0 => "--es",
        extrapolation_sigma: f64 = 3.0 => "--fs",
        aggregator_type: AggregatorTypeNonRigid = AggregatorTypeNonRigid::Baloo => "-a",
        kissing_point_location: f64 = 0.5 => "-K",
        symmetry_type: SymmetryType = SymmetryType::Asymmetric => "-sym-reg",
        bobyqa_scale_upper_bound: f64 = 3.0 => "--scu",
        bobyqa_angle_upper_bound: f64 = 180.0 => "--aub",
        bobyqa_translate_upper_bound: u32 = 3 => "--tub",
        exhaustive_search_step: u32 = 1 => "--st",
        maximum_local_optimizer_iterations: u32 = 100 => "--oi",
        minimum_distance_between_transforms: f64 = 0.01 => "--me",
        maximum_block_match_iterations: u32 = 10 => "--mi",
        optimizer: OptimizerType = OptimizerType::Bobyqa => "--opt",
        similarity_metric: SimilarityMetric = SimilarityMetric::SquaredCorrelationCoefficient => "--metric",
        direction_of_directional_affine: CartesianAxis = CartesianAxis::Y => "-d",
        transformation_type_between_blocks: TransformationType = TransformationType::Translation => "-t",
        percentage_of_blocks_kept: f64 = 0.8 => "-k",
        block_minimum_standard_deviation: f64 = 5.0 => "-s",
        block_spacing: u32 = 2 => "--sp",
        block_size: u32 = 5 => "--bs",
    }
}

registration_record! {
    /// `animaPyramidalBMRegistration`的参数。
    ///
    /// 帮助文档没有给出`aggregator_threshold_value`的默认值，这里取该程序源码中的0.5。
    /// `--ot`排在最后。
    RigidParameters, RigidPatch {
        last_pyramid_level: u32 = 0 => "-l",
        number_of_pyramid_levels: u32 = 3 => "-p",
        lts_stopping_threshold: f64 = 0.01 => "--lst",
        aggregator_threshold_value: f64 = 0.5 => "--at",
        aggregator_type: AggregatorTypeRigid = AggregatorTypeRigid::MEstimation => "-a",
        kissing_point_location: f64 = 0.5 => "-K",
        symmetry_type: SymmetryType = SymmetryType::Asymmetric => "-sym-reg",
        bobyqa_scale_upper_bound: f64 = 3.0 => "--scu",
        bobyqa_angle_upper_bound: f64 = 180.0 => "--aub",
        bobyqa_translate_upper_bound: u32 = 3 => "--tub",
        exhaustive_search_step: u32 = 2 => "--st",
        initialisation_type: InitialisationType = InitialisationType::AlignGravityCentres => "-I",
        maximum_local_optimizer_iterations: u32 = 100 => "--oi",
        minimum_distance_between_transforms: f64 = 0.01 => "--me",
        maximum_block_match_iterations: u32 = 10 => "--mi",
        optimizer: OptimizerType = OptimizerType::Bobyqa => "--opt",
        similarity_metric: SimilarityMetric = SimilarityMetric::SquaredCorrelationCoefficient => "--metric",
        direction_of_directional_affine: CartesianAxis = CartesianAxis::Y => "-d",
        transformation_type_between_blocks: TransformationType = TransformationType::Translation => "-t",
        percentage_of_blocks_kept: f64 = 0.8 => "-k",
        block_minimum_standard_deviation: f64 = 5.0 => "-s",
        block_spacing: u32 = 5 => "--sp",
        block_size: u32 = 5 => "--bs",
        output_transformation_type: RigidOutputTransformationType = RigidOutputTransformationType::Rigid => "--ot",
    }
}

impl RigidParameters {
    /// 图谱构建时刚性配准使用的默认值。
    pub fn atlas_defaults() -> Self {
        Self {
            number_of_pyramid_levels: 3,
            last_pyramid_level: 0,
            initialisation_type: InitialisationType::GravityPcaClosestTransform,
            symmetry_type: SymmetryType::Kissing,
            output_transformation_type: RigidOutputTransformationType::Affine,
            ..Self::default()
        }
    }
}

impl DenseParameters {
    /// 图谱构建时稠密配准使用的默认值。
    pub fn atlas_defaults() -> Self {
        Self {
            bobyqa_translate_upper_bound: 2,
            elastic_regularisation_sigma: 3.0,
            extrapolation_sigma: 2.0,
            symmetry_type: SymmetryType::Kissing,
            similarity_metric: SimilarityMetric::CorrelationCoefficient,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_defaults_render_in_wire_order() {
        let args = DenseParameters::default().command_args();
        let expected = [
            "-l", "0", "-p", "3", "-e", "0.0", "-b", "1", "--met", "0.01", "--os", "3.0", "--es",
            "3.0", "--fs", "3.0", "-a", "0", "-K", "0.5", "-sym-reg", "0", "--scu", "3.0", "--aub",
            "180.0", "--tub", "3", "--st", "1", "--oi", "100", "--me", "0.01", "--mi", "10",
            "--opt", "1", "--metric", "2", "-d", "1", "-t", "0", "-k", "0.8", "-s", "5.0", "--sp",
            "2", "--bs", "5",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn rigid_defaults_render_in_wire_order() {
        let args = RigidParameters::default().command_args();
        let expected = [
            "-l", "0", "-p", "3", "--lst", "0.01", "--at", "0.5", "-a", "0", "-K", "0.5",
            "-sym-reg", "0", "--scu", "3.0", "--aub", "180.0", "--tub", "3", "--st", "2", "-I",
            "1", "--oi", "100", "--me", "0.01", "--mi", "10", "--opt", "1", "--metric", "2", "-d",
            "1", "-t", "0", "-k", "0.8", "-s", "5.0", "--sp", "5", "--bs", "5", "--ot", "1",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn flags_pair_with_values() {
        let args = RigidParameters::atlas_defaults().command_args();
        assert_eq!(args.len(), 2 * RigidParameters::FLAGS.len());
        for (pair, flag) in args.chunks(2).zip(RigidParameters::FLAGS) {
            assert_eq!(pair[0], *flag);
        }
    }

    #[test]
    fn atlas_defaults_only_touch_documented_fields() {
        let rigid = RigidParameters::atlas_defaults();
        assert_eq!(rigid.symmetry_type, SymmetryType::Kissing);
        assert_eq!(rigid.initialisation_type, InitialisationType::GravityPcaClosestTransform);
        assert_eq!(rigid.output_transformation_type, RigidOutputTransformationType::Affine);
        assert_eq!(rigid.block_spacing, RigidParameters::default().block_spacing);

        let dense = DenseParameters::atlas_defaults();
        assert_eq!(dense.bobyqa_translate_upper_bound, 2);
        assert_eq!(dense.extrapolation_sigma, 2.0);
        assert_eq!(dense.similarity_metric, SimilarityMetric::CorrelationCoefficient);
        assert_eq!(dense.block_spacing, DenseParameters::default().block_spacing);
    }
}
